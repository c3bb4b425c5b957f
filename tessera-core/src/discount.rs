//! Discount resolution: group-tier discounts vs. promo codes.
//!
//! The two mechanisms are computed independently and the larger one wins.
//! They are never added together, and the breakdown line is labeled with the
//! rule that actually fired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{apply_rate, percent_to_basis_points};

/// One group-sales discount tier, active for an event. The tier with the
/// highest `min_quantity` not exceeding the ticket count applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountTier {
    pub min_quantity: u32,
    pub kind: TierKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum TierKind {
    /// Percentage of the order subtotal, e.g. 10.0 for 10% off.
    PercentOfSubtotal(f64),
    /// Fixed cents off per ticket.
    FixedPerTicket(i64),
}

/// A promo code as loaded from the store. Validation happens server-side on
/// every resolution; amounts are never reused across validations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub kind: PromoKind,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
    pub use_count: u32,
    pub per_customer_limit: Option<u32>,
    pub min_subtotal: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PromoKind {
    Fixed(i64),
    Percent(f64),
}

/// Why a promo code did not apply. Surfaced verbatim to the checkout caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromoRejection {
    #[error("promo code invalid: not found")]
    NotFound,
    #[error("promo code invalid: no longer active")]
    Inactive,
    #[error("promo code invalid: expired")]
    Expired,
    #[error("promo code invalid: usage limit reached")]
    UsageLimitReached,
    #[error("promo code invalid: customer limit reached")]
    CustomerLimitReached,
    #[error("promo code invalid: order subtotal below minimum of {0} cents")]
    BelowMinimumSubtotal(i64),
}

/// Which rule produced the applied discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum DiscountSource {
    None,
    Promo { code: String },
    GroupTier { min_quantity: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDiscount {
    pub amount: i64,
    pub source: DiscountSource,
}

impl ResolvedDiscount {
    pub fn none() -> Self {
        Self {
            amount: 0,
            source: DiscountSource::None,
        }
    }
}

/// Validate a promo code against the current order and customer history,
/// returning the discount it would grant in cents.
pub fn validate_promo(
    promo: &PromoCode,
    now: DateTime<Utc>,
    subtotal: i64,
    prior_uses_by_customer: u32,
) -> Result<i64, PromoRejection> {
    if !promo.active {
        return Err(PromoRejection::Inactive);
    }
    if let Some(expires_at) = promo.expires_at {
        if now >= expires_at {
            return Err(PromoRejection::Expired);
        }
    }
    if let Some(max) = promo.max_uses {
        if promo.use_count >= max {
            return Err(PromoRejection::UsageLimitReached);
        }
    }
    if let Some(limit) = promo.per_customer_limit {
        if prior_uses_by_customer >= limit {
            return Err(PromoRejection::CustomerLimitReached);
        }
    }
    if let Some(min) = promo.min_subtotal {
        if subtotal < min {
            return Err(PromoRejection::BelowMinimumSubtotal(min));
        }
    }

    let amount = match &promo.kind {
        PromoKind::Fixed(cents) => *cents,
        PromoKind::Percent(pct) => apply_rate(subtotal, percent_to_basis_points(*pct)),
    };
    // A discount can never exceed what is being discounted
    Ok(amount.min(subtotal))
}

/// Best qualifying group tier for a ticket count, if any.
pub fn best_tier(tiers: &[DiscountTier], ticket_count: u32) -> Option<&DiscountTier> {
    tiers
        .iter()
        .filter(|t| t.min_quantity <= ticket_count)
        .max_by_key(|t| t.min_quantity)
}

fn tier_amount(tier: &DiscountTier, ticket_count: u32, subtotal: i64) -> i64 {
    let amount = match tier.kind {
        TierKind::PercentOfSubtotal(pct) => apply_rate(subtotal, percent_to_basis_points(pct)),
        TierKind::FixedPerTicket(cents) => cents * ticket_count as i64,
    };
    amount.min(subtotal)
}

/// Winner-take-all resolution of the group-tier discount against an already
/// validated promo discount. Must be re-invoked whenever `ticket_count` or
/// `subtotal` changes. A tie labels the discount as the promo.
pub fn resolve(
    tiers: &[DiscountTier],
    ticket_count: u32,
    subtotal: i64,
    promo: Option<(&str, i64)>,
) -> ResolvedDiscount {
    let group = best_tier(tiers, ticket_count)
        .map(|t| (t.min_quantity, tier_amount(t, ticket_count, subtotal)));

    let group_amount = group.map(|(_, a)| a).unwrap_or(0);
    let promo_amount = promo.map(|(_, a)| a).unwrap_or(0);

    if promo_amount == 0 && group_amount == 0 {
        return ResolvedDiscount::none();
    }

    if promo_amount >= group_amount {
        let (code, amount) = promo.unwrap_or(("", 0));
        ResolvedDiscount {
            amount,
            source: DiscountSource::Promo {
                code: code.to_string(),
            },
        }
    } else {
        let (min_quantity, amount) = group.unwrap_or((0, 0));
        ResolvedDiscount {
            amount,
            source: DiscountSource::GroupTier { min_quantity },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tiers() -> Vec<DiscountTier> {
        vec![
            DiscountTier {
                min_quantity: 5,
                kind: TierKind::FixedPerTicket(100),
            },
            DiscountTier {
                min_quantity: 10,
                kind: TierKind::PercentOfSubtotal(10.0),
            },
        ]
    }

    fn promo(kind: PromoKind) -> PromoCode {
        PromoCode {
            code: "SAVE".to_string(),
            kind,
            active: true,
            expires_at: None,
            max_uses: None,
            use_count: 0,
            per_customer_limit: None,
            min_subtotal: None,
        }
    }

    #[test]
    fn test_winner_take_all() {
        // group 5.00 beats promo 3.00
        let r = resolve(
            &[DiscountTier {
                min_quantity: 1,
                kind: TierKind::FixedPerTicket(500),
            }],
            1,
            10_000,
            Some(("SAVE", 300)),
        );
        assert_eq!(r.amount, 500);
        assert_eq!(r.source, DiscountSource::GroupTier { min_quantity: 1 });

        // promo 7.00 beats group 2.00
        let r = resolve(
            &[DiscountTier {
                min_quantity: 1,
                kind: TierKind::FixedPerTicket(200),
            }],
            1,
            10_000,
            Some(("SAVE", 700)),
        );
        assert_eq!(r.amount, 700);
        assert_eq!(
            r.source,
            DiscountSource::Promo {
                code: "SAVE".to_string()
            }
        );

        // both zero
        let r = resolve(&[], 1, 10_000, None);
        assert_eq!(r, ResolvedDiscount::none());
    }

    #[test]
    fn test_tie_labels_promo() {
        let r = resolve(
            &[DiscountTier {
                min_quantity: 1,
                kind: TierKind::FixedPerTicket(500),
            }],
            1,
            10_000,
            Some(("SAVE", 500)),
        );
        assert!(matches!(r.source, DiscountSource::Promo { .. }));
    }

    #[test]
    fn test_highest_qualifying_tier() {
        let tiers = tiers();
        let t = best_tier(&tiers, 12).unwrap();
        assert_eq!(t.min_quantity, 10);
        let t = best_tier(&tiers, 7).unwrap();
        assert_eq!(t.min_quantity, 5);
        assert!(best_tier(&tiers, 3).is_none());
    }

    #[test]
    fn test_tier_recomputes_with_count_and_subtotal() {
        // 10 tickets at $20 each: the 10% tier gives $20 off
        let r = resolve(&tiers(), 10, 20_000, None);
        assert_eq!(r.amount, 2_000);
        // dropping to 7 tickets falls back to $1/ticket
        let r = resolve(&tiers(), 7, 14_000, None);
        assert_eq!(r.amount, 700);
    }

    #[test]
    fn test_promo_validation_reasons() {
        let now = Utc::now();

        let mut p = promo(PromoKind::Fixed(500));
        p.active = false;
        assert_eq!(validate_promo(&p, now, 10_000, 0), Err(PromoRejection::Inactive));

        let mut p = promo(PromoKind::Fixed(500));
        p.expires_at = Some(now - Duration::hours(1));
        assert_eq!(validate_promo(&p, now, 10_000, 0), Err(PromoRejection::Expired));

        let mut p = promo(PromoKind::Fixed(500));
        p.max_uses = Some(3);
        p.use_count = 3;
        assert_eq!(
            validate_promo(&p, now, 10_000, 0),
            Err(PromoRejection::UsageLimitReached)
        );

        let mut p = promo(PromoKind::Fixed(500));
        p.per_customer_limit = Some(1);
        assert_eq!(
            validate_promo(&p, now, 10_000, 1),
            Err(PromoRejection::CustomerLimitReached)
        );

        let mut p = promo(PromoKind::Fixed(500));
        p.min_subtotal = Some(20_000);
        assert_eq!(
            validate_promo(&p, now, 10_000, 0),
            Err(PromoRejection::BelowMinimumSubtotal(20_000))
        );
    }

    #[test]
    fn test_promo_percent_and_cap() {
        let now = Utc::now();
        let p = promo(PromoKind::Percent(25.0));
        assert_eq!(validate_promo(&p, now, 10_000, 0), Ok(2_500));

        // fixed discount larger than the subtotal is capped
        let p = promo(PromoKind::Fixed(50_000));
        assert_eq!(validate_promo(&p, now, 10_000, 0), Ok(10_000));
    }
}
