use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One platform-fee charge for one completed order. Unique per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub organization_id: Uuid,
    /// The order total the fee was computed from, in cents.
    pub transaction_amount: i64,
    pub fee_percentage: f64,
    pub fee_fixed: i64,
    pub total_fee: i64,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub billed: bool,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An organization's active billing cycle. Absent cycles fall back to
/// calendar-month periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingCycle {
    pub interval_days: i64,
    pub next_billing_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingCustomer {
    /// Organization or group this billing profile belongs to.
    pub subject_id: Uuid,
    pub email: Option<String>,
    /// A chargeable payment method is on file with the provider.
    pub has_billing_method: bool,
    pub cycle: Option<BillingCycle>,
    pub provider_customer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    Partial,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSource {
    /// Aggregated group-sale discounts owed by a group.
    GroupDiscounts,
    /// Aggregated per-order platform fees owed by an organization.
    PlatformUsage,
}

/// A billing document for one group/organization over one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvoice {
    pub id: Uuid,
    pub group_id: Uuid,
    pub source: InvoiceSource,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub total_tickets_sold: i64,
    pub total_revenue: i64,
    /// What the group owes; equals the aggregated discounts or fees.
    pub amount_owed: i64,
    pub amount_paid: i64,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

impl GroupInvoice {
    /// Status is derived from payment progress; `draft`/`sent`/`viewed`
    /// survive until the first payment lands.
    pub fn derive_status(&self) -> InvoiceStatus {
        if self.amount_paid >= self.amount_owed {
            InvoiceStatus::Paid
        } else if self.amount_paid > 0 {
            InvoiceStatus::Partial
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i64,
    pub amount: i64,
}
