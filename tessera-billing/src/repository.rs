use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tessera_core::CoreResult;
use tessera_ledger::GroupTicketSale;
use uuid::Uuid;

use crate::models::{BillingCustomer, GroupInvoice, InvoiceLineItem, UsageRecord};

/// Result of applying one provider payment session to an invoice.
#[derive(Debug, Clone)]
pub enum PaymentApplication {
    /// The increment was applied; carries the updated invoice.
    Applied(GroupInvoice),
    /// This provider session was already processed for this invoice;
    /// nothing changed.
    Duplicate(GroupInvoice),
}

/// Data access for usage records, billing customers and invoices.
///
/// Implementations must guarantee:
/// - `insert_usage` is idempotent on `order_id` (unique constraint);
/// - `create_*_invoice` creates the document, its line items and marks the
///   constituent records billed in one transaction;
/// - `apply_invoice_payment` registers the session id and increments
///   `amount_paid` atomically, so a redelivered webhook cannot double-count.
#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn get_billing_customer(&self, subject_id: Uuid) -> CoreResult<Option<BillingCustomer>>;

    /// Returns `false` when a record for this order already exists.
    async fn insert_usage(&self, record: &UsageRecord) -> CoreResult<bool>;

    async fn unbilled_usage(
        &self,
        organization_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> CoreResult<Vec<UsageRecord>>;

    async fn unbilled_group_sales(
        &self,
        group_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> CoreResult<Vec<GroupTicketSale>>;

    async fn create_group_invoice(
        &self,
        invoice: &GroupInvoice,
        line_items: &[InvoiceLineItem],
        sale_ids: &[Uuid],
    ) -> CoreResult<()>;

    async fn create_usage_invoice(
        &self,
        invoice: &GroupInvoice,
        line_items: &[InvoiceLineItem],
        usage_ids: &[Uuid],
    ) -> CoreResult<()>;

    async fn get_invoice(&self, id: Uuid) -> CoreResult<Option<GroupInvoice>>;

    async fn apply_invoice_payment(
        &self,
        invoice_id: Uuid,
        session_id: &str,
        amount: i64,
    ) -> CoreResult<PaymentApplication>;
}
