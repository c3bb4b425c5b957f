//! Integer-cent money arithmetic.
//!
//! All amounts in the core are minor units (`i64` cents). Percentage rates
//! are converted to basis points so every money path stays in integer
//! arithmetic; division rounds half-up at the point of output.

/// Basis points per whole (100%).
pub const BASIS_POINTS: i64 = 10_000;

/// Convert a percentage rate (e.g. 15.0 for 15%) to basis points.
pub fn percent_to_basis_points(rate: f64) -> i64 {
    (rate * 100.0).round() as i64
}

/// `numerator / denominator` with half-up rounding. Intermediate math is
/// `i128` so 7-figure totals times basis points cannot overflow.
pub fn div_half_up(numerator: i64, denominator: i64) -> i64 {
    debug_assert!(denominator > 0);
    let n = numerator as i128;
    let d = denominator as i128;
    ((n + d / 2) / d) as i64
}

/// Apply a basis-point rate to an amount of cents, half-up.
pub fn apply_rate(amount_cents: i64, rate_bp: i64) -> i64 {
    let n = amount_cents as i128 * rate_bp as i128;
    let d = BASIS_POINTS as i128;
    ((n + d / 2) / d) as i64
}

/// Format cents as a decimal string, e.g. `1050` -> `"10.50"`.
pub fn format_cents(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_up_rounding() {
        assert_eq!(div_half_up(5, 2), 3); // 2.5 rounds up
        assert_eq!(div_half_up(4, 2), 2);
        assert_eq!(div_half_up(7, 3), 2); // 2.33 rounds down
    }

    #[test]
    fn test_apply_rate() {
        // 1.00% of $20.00 is $0.20
        assert_eq!(apply_rate(2_000, 100), 20);
        // 15% of $100.00
        assert_eq!(apply_rate(10_000, 1_500), 1_500);
    }

    #[test]
    fn test_format() {
        assert_eq!(format_cents(1050), "10.50");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
