use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inventory grant of N tickets of one type, for one event, to one group,
/// at a negotiated full price and minimum price.
///
/// Invariant at every mutation:
/// `0 <= used_quantity`, `0 <= reserved_quantity`,
/// `used_quantity + reserved_quantity <= allocated_quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTicketAllocation {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub group_id: Uuid,
    pub allocated_quantity: i32,
    pub used_quantity: i32,
    pub reserved_quantity: i32,
    /// Negotiated full price in cents. Eligibility bound only; the discount
    /// basis on each sale is the live ticket-type list price.
    pub full_price: i64,
    /// Negotiated floor in cents. Sales below this are rejected.
    pub minimum_price: i64,
    /// Remaining count at which the last low-inventory notification fired.
    /// Cleared when stock climbs back above the threshold.
    pub low_stock_notified_remaining: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupTicketAllocation {
    pub fn remaining(&self) -> i32 {
        self.allocated_quantity - self.used_quantity - self.reserved_quantity
    }

    /// Low-inventory threshold: 10% of the allocation, rounded up.
    pub fn low_stock_threshold(&self) -> i32 {
        (self.allocated_quantity + 9) / 10
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SalePaymentStatus {
    Paid,
    Refunded,
}

/// One sold ticket under an allocation. The discount is derived from the
/// stored prices, never stored independently, so it cannot drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTicketSale {
    pub id: Uuid,
    pub allocation_id: Uuid,
    pub order_id: Uuid,
    pub ticket_id: Uuid,
    /// Ticket type's list price at time of sale, in cents.
    pub full_price: i64,
    pub paid_price: i64,
    pub payment_status: SalePaymentStatus,
    /// Set when the sale's discount has been rolled into a group invoice.
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl GroupTicketSale {
    pub fn discount(&self) -> i64 {
        self.full_price - self.paid_price
    }
}
