//! Tax and booking-fee calculator.
//!
//! Turns raw checkout amounts plus a jurisdiction config into a fully
//! reconciled monetary breakdown. Pure computation, no I/O. In inclusive
//! jurisdictions (NZ/AU/UK GST/VAT) the quoted amounts already contain tax
//! and the customer-visible total never changes; in exclusive jurisdictions
//! (US sales tax) tax is added on top.

use serde::{Deserialize, Serialize};

use crate::money::{apply_rate, div_half_up, percent_to_basis_points, BASIS_POINTS};

/// Jurisdiction tax configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxConfig {
    pub enabled: bool,
    /// Rate as a percentage, e.g. 15.0 for NZ GST.
    pub rate: f64,
    /// Quoted prices already contain tax.
    pub inclusive: bool,
    pub country: Option<String>,
}

impl TaxConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rate: 0.0,
            inclusive: false,
            country: None,
        }
    }
}

/// Raw checkout amounts in cents, as quoted to the customer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChargeAmounts {
    pub tickets: i64,
    pub addons: i64,
    pub donations: i64,
    pub booking_fee: i64,
}

/// Reconciled monetary breakdown. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    /// Pre-tax sum of tickets, add-ons and donations (fee excluded).
    pub subtotal: i64,
    pub ticket_tax: i64,
    pub addon_tax: i64,
    pub donation_tax: i64,
    /// Sum of the three category taxes, fee tax excluded.
    pub total_tax: i64,
    /// Pre-tax booking fee.
    pub booking_fee: i64,
    pub booking_fee_tax: i64,
    /// Customer-facing total.
    pub grand_total: i64,
    pub tax_inclusive: bool,
}

impl TaxBreakdown {
    pub fn calculate(amounts: ChargeAmounts, config: &TaxConfig) -> Self {
        let rate_bp = percent_to_basis_points(config.rate);

        // rate 0 with enabled=true must take the same path as disabled
        if !config.enabled || rate_bp == 0 {
            let subtotal = amounts.tickets + amounts.addons + amounts.donations;
            return Self {
                subtotal,
                ticket_tax: 0,
                addon_tax: 0,
                donation_tax: 0,
                total_tax: 0,
                booking_fee: amounts.booking_fee,
                booking_fee_tax: 0,
                grand_total: subtotal + amounts.booking_fee,
                tax_inclusive: config.inclusive,
            };
        }

        if config.inclusive {
            // Extract: pretax = amount / (1 + rate). The tax component is the
            // remainder after the rounded extraction, so pretax + tax always
            // reconstructs the quoted amount to the cent.
            let extract = |amount: i64| -> (i64, i64) {
                let pretax = div_half_up(amount * BASIS_POINTS, BASIS_POINTS + rate_bp);
                (pretax, amount - pretax)
            };
            let (tickets, ticket_tax) = extract(amounts.tickets);
            let (addons, addon_tax) = extract(amounts.addons);
            let (donations, donation_tax) = extract(amounts.donations);
            let (fee, fee_tax) = extract(amounts.booking_fee);

            Self {
                subtotal: tickets + addons + donations,
                ticket_tax,
                addon_tax,
                donation_tax,
                total_tax: ticket_tax + addon_tax + donation_tax,
                booking_fee: fee,
                booking_fee_tax: fee_tax,
                // The customer keeps paying exactly what they were quoted.
                grand_total: amounts.tickets
                    + amounts.addons
                    + amounts.donations
                    + amounts.booking_fee,
                tax_inclusive: true,
            }
        } else {
            let ticket_tax = apply_rate(amounts.tickets, rate_bp);
            let addon_tax = apply_rate(amounts.addons, rate_bp);
            let donation_tax = apply_rate(amounts.donations, rate_bp);
            let booking_fee_tax = apply_rate(amounts.booking_fee, rate_bp);
            let subtotal = amounts.tickets + amounts.addons + amounts.donations;
            let total_tax = ticket_tax + addon_tax + donation_tax;

            Self {
                subtotal,
                ticket_tax,
                addon_tax,
                donation_tax,
                total_tax,
                booking_fee: amounts.booking_fee,
                booking_fee_tax,
                grand_total: subtotal + total_tax + amounts.booking_fee + booking_fee_tax,
                tax_inclusive: false,
            }
        }
    }
}
