use std::sync::Arc;

use chrono::Utc;
use tessera_core::notify::{NotificationKind, Notifier};
use tessera_core::CoreError;
use uuid::Uuid;

use crate::models::{GroupTicketAllocation, GroupTicketSale, SalePaymentStatus};
use crate::repository::AllocationRepository;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Allocation not found: {0}")]
    NotFound(Uuid),

    #[error("Paid price {paid} is below the allocation minimum {minimum}")]
    BelowMinimumPrice { paid: i64, minimum: i64 },

    #[error("Allocation {0} is sold out; the sale would overbook it")]
    Overbooked(Uuid),

    #[error(transparent)]
    Storage(#[from] CoreError),
}

#[derive(Debug, Clone)]
pub struct SaleRequest {
    pub allocation_id: Uuid,
    pub order_id: Uuid,
    pub ticket_id: Uuid,
    /// Live ticket-type list price, the discount basis. Not the
    /// allocation's negotiated full price.
    pub list_price: i64,
    pub paid_price: i64,
}

#[derive(Debug, Clone)]
pub struct SaleOutcome {
    pub sale: GroupTicketSale,
    pub remaining: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded,
    /// Second refund of the same ticket; ledger state unchanged.
    AlreadyRefunded,
    /// The ticket was never part of a group sale.
    NotApplicable,
}

/// Tracks group ticket inventory and records each sale with full-price vs.
/// paid-price for discount accounting. All quantity mutations go through
/// the repository's conditional updates so concurrent sales against the
/// same allocation serialize at the row.
pub struct AllocationLedger {
    repo: Arc<dyn AllocationRepository>,
    notifier: Arc<dyn Notifier>,
}

impl AllocationLedger {
    pub fn new(repo: Arc<dyn AllocationRepository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { repo, notifier }
    }

    pub async fn record_sale(&self, req: SaleRequest) -> Result<SaleOutcome, LedgerError> {
        let allocation = self
            .repo
            .get_allocation(req.allocation_id)
            .await?
            .ok_or(LedgerError::NotFound(req.allocation_id))?;

        if req.paid_price < allocation.minimum_price {
            return Err(LedgerError::BelowMinimumPrice {
                paid: req.paid_price,
                minimum: allocation.minimum_price,
            });
        }

        let sale = GroupTicketSale {
            id: Uuid::new_v4(),
            allocation_id: req.allocation_id,
            order_id: req.order_id,
            ticket_id: req.ticket_id,
            full_price: req.list_price,
            paid_price: req.paid_price,
            payment_status: SalePaymentStatus::Paid,
            invoice_id: None,
            created_at: Utc::now(),
        };

        let updated = self
            .repo
            .try_record_sale(&sale)
            .await?
            .ok_or(LedgerError::Overbooked(req.allocation_id))?;

        tracing::info!(
            allocation_id = %req.allocation_id,
            ticket_id = %req.ticket_id,
            discount = sale.discount(),
            remaining = updated.remaining(),
            "Group sale recorded"
        );

        self.check_low_inventory(&updated).await?;

        Ok(SaleOutcome {
            sale,
            remaining: updated.remaining(),
        })
    }

    pub async fn record_refund(&self, ticket_id: Uuid) -> Result<RefundOutcome, LedgerError> {
        let Some(sale) = self.repo.find_sale_by_ticket(ticket_id).await? else {
            return Ok(RefundOutcome::NotApplicable);
        };

        // Idempotence is decided by the repository's conditional update,
        // not by the status read above: two concurrent refunds can both
        // read `paid`, but only one status flip matches.
        let Some(updated) = self.repo.refund_sale(sale.id).await? else {
            return Ok(RefundOutcome::AlreadyRefunded);
        };
        tracing::info!(
            allocation_id = %sale.allocation_id,
            ticket_id = %ticket_id,
            remaining = updated.remaining(),
            "Group sale refunded"
        );

        // Stock back above the threshold re-arms the low-inventory alert
        if updated.low_stock_notified_remaining.is_some()
            && updated.remaining() > updated.low_stock_threshold()
        {
            self.repo
                .set_low_stock_watermark(updated.id, None)
                .await?;
        }

        Ok(RefundOutcome::Refunded)
    }

    /// Fire `low_inventory` once per threshold crossing. The watermark
    /// suppresses repeat alerts while stock stays in the threshold band.
    async fn check_low_inventory(
        &self,
        allocation: &GroupTicketAllocation,
    ) -> Result<(), LedgerError> {
        let remaining = allocation.remaining();
        let threshold = allocation.low_stock_threshold();
        if remaining > threshold || remaining <= 0 || allocation.low_stock_notified_remaining.is_some()
        {
            return Ok(());
        }

        self.repo
            .set_low_stock_watermark(allocation.id, Some(remaining))
            .await?;

        let payload = serde_json::json!({
            "allocation_id": allocation.id,
            "event_id": allocation.event_id,
            "group_id": allocation.group_id,
            "remaining": remaining,
            "allocated": allocation.allocated_quantity,
        });
        if let Err(err) = self
            .notifier
            .notify(NotificationKind::LowInventory, payload)
            .await
        {
            tracing::warn!(allocation_id = %allocation.id, error = %err, "Low-inventory notification failed");
        }
        Ok(())
    }
}
