//! Invoice generation and payment reconciliation.
//!
//! The periodic generation job aggregates unbilled records for a closed
//! period into an invoice document. It is safe to re-run: aggregation
//! queries filter strictly on unbilled records, and marking happens in the
//! same transaction as document creation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tessera_core::notify::{NotificationKind, Notifier};
use tessera_core::{CoreError, CoreResult};
use uuid::Uuid;

use crate::models::{GroupInvoice, InvoiceLineItem, InvoiceSource, InvoiceStatus};
use crate::repository::{BillingRepository, PaymentApplication};

/// Minimum amount worth invoicing, in cents.
pub const DEFAULT_MIN_CHARGE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceSkip {
    /// No unbilled records in the period.
    NothingToBill,
    /// Aggregate below the minimum-charge threshold.
    BelowMinimumCharge,
    /// No billing method on file for the group/organization.
    NoBillingMethod,
}

#[derive(Debug, Clone)]
pub enum InvoiceOutcome {
    Generated(GroupInvoice),
    Skipped(InvoiceSkip),
}

#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    Applied {
        invoice: GroupInvoice,
        status: InvoiceStatus,
    },
    /// Redelivered webhook for an already-processed provider session.
    AlreadyApplied,
}

pub struct InvoiceGenerator {
    repo: Arc<dyn BillingRepository>,
    notifier: Arc<dyn Notifier>,
    min_charge: i64,
}

impl InvoiceGenerator {
    pub fn new(repo: Arc<dyn BillingRepository>, notifier: Arc<dyn Notifier>, min_charge: i64) -> Self {
        Self {
            repo,
            notifier,
            min_charge,
        }
    }

    /// Roll a group's unbilled sale discounts for the period into one
    /// invoice document with per-allocation line items.
    pub async fn generate_group_invoice(
        &self,
        group_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        due_date: Option<DateTime<Utc>>,
    ) -> CoreResult<InvoiceOutcome> {
        let customer = self.repo.get_billing_customer(group_id).await?;
        if !customer.map(|c| c.has_billing_method).unwrap_or(false) {
            return Ok(InvoiceOutcome::Skipped(InvoiceSkip::NoBillingMethod));
        }

        let sales = self
            .repo
            .unbilled_group_sales(group_id, period_start, period_end)
            .await?;
        if sales.is_empty() {
            return Ok(InvoiceOutcome::Skipped(InvoiceSkip::NothingToBill));
        }

        let amount_owed: i64 = sales.iter().map(|s| s.discount()).sum();
        if amount_owed < self.min_charge {
            return Ok(InvoiceOutcome::Skipped(InvoiceSkip::BelowMinimumCharge));
        }

        let invoice_id = Uuid::new_v4();
        let invoice = GroupInvoice {
            id: invoice_id,
            group_id,
            source: InvoiceSource::GroupDiscounts,
            period_start,
            period_end,
            due_date,
            total_tickets_sold: sales.len() as i64,
            total_revenue: sales.iter().map(|s| s.paid_price).sum(),
            amount_owed,
            amount_paid: 0,
            status: InvoiceStatus::Draft,
            created_at: Utc::now(),
        };

        // One line item per allocation the discounts came from
        let mut by_allocation: BTreeMap<Uuid, (i64, i64)> = BTreeMap::new();
        for sale in &sales {
            let entry = by_allocation.entry(sale.allocation_id).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += sale.discount();
        }
        let line_items: Vec<InvoiceLineItem> = by_allocation
            .into_iter()
            .map(|(allocation_id, (quantity, amount))| InvoiceLineItem {
                id: Uuid::new_v4(),
                invoice_id,
                description: format!("Group discounts, allocation {allocation_id}"),
                quantity,
                amount,
            })
            .collect();

        let sale_ids: Vec<Uuid> = sales.iter().map(|s| s.id).collect();
        self.repo
            .create_group_invoice(&invoice, &line_items, &sale_ids)
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            group_id = %group_id,
            amount_owed,
            tickets = invoice.total_tickets_sold,
            "Group invoice generated"
        );
        self.notify_generated(&invoice).await;

        Ok(InvoiceOutcome::Generated(invoice))
    }

    /// Roll an organization's unbilled platform-fee usage for the period
    /// into one invoice document.
    pub async fn generate_usage_invoice(
        &self,
        organization_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        due_date: Option<DateTime<Utc>>,
    ) -> CoreResult<InvoiceOutcome> {
        let customer = self.repo.get_billing_customer(organization_id).await?;
        if !customer.map(|c| c.has_billing_method).unwrap_or(false) {
            return Ok(InvoiceOutcome::Skipped(InvoiceSkip::NoBillingMethod));
        }

        let records = self
            .repo
            .unbilled_usage(organization_id, period_start, period_end)
            .await?;
        if records.is_empty() {
            return Ok(InvoiceOutcome::Skipped(InvoiceSkip::NothingToBill));
        }

        let amount_owed: i64 = records.iter().map(|r| r.total_fee).sum();
        if amount_owed < self.min_charge {
            return Ok(InvoiceOutcome::Skipped(InvoiceSkip::BelowMinimumCharge));
        }

        let invoice_id = Uuid::new_v4();
        let invoice = GroupInvoice {
            id: invoice_id,
            group_id: organization_id,
            source: InvoiceSource::PlatformUsage,
            period_start,
            period_end,
            due_date,
            total_tickets_sold: records.len() as i64,
            total_revenue: records.iter().map(|r| r.transaction_amount).sum(),
            amount_owed,
            amount_paid: 0,
            status: InvoiceStatus::Draft,
            created_at: Utc::now(),
        };
        let line_items = vec![InvoiceLineItem {
            id: Uuid::new_v4(),
            invoice_id,
            description: format!("Platform fees for {} orders", records.len()),
            quantity: records.len() as i64,
            amount: amount_owed,
        }];

        let usage_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        self.repo
            .create_usage_invoice(&invoice, &line_items, &usage_ids)
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            organization_id = %organization_id,
            amount_owed,
            "Usage invoice generated"
        );
        self.notify_generated(&invoice).await;

        Ok(InvoiceOutcome::Generated(invoice))
    }

    /// Apply a provider-reported payment to an invoice. Deduplicated by the
    /// provider session id, so webhook redelivery cannot double-count.
    pub async fn apply_payment(
        &self,
        invoice_id: Uuid,
        session_id: &str,
        amount: i64,
    ) -> CoreResult<PaymentOutcome> {
        if amount <= 0 {
            return Err(CoreError::Validation(format!(
                "payment amount must be positive, got {amount}"
            )));
        }

        match self
            .repo
            .apply_invoice_payment(invoice_id, session_id, amount)
            .await?
        {
            PaymentApplication::Applied(invoice) => {
                let status = invoice.derive_status();
                tracing::info!(
                    invoice_id = %invoice_id,
                    session_id,
                    amount,
                    amount_paid = invoice.amount_paid,
                    ?status,
                    "Invoice payment applied"
                );
                let payload = serde_json::json!({
                    "invoice_id": invoice_id,
                    "group_id": invoice.group_id,
                    "amount": amount,
                    "amount_paid": invoice.amount_paid,
                    "amount_owed": invoice.amount_owed,
                });
                if let Err(err) = self
                    .notifier
                    .notify(NotificationKind::PaymentReceived, payload)
                    .await
                {
                    tracing::warn!(invoice_id = %invoice_id, error = %err, "Payment notification failed");
                }
                Ok(PaymentOutcome::Applied { invoice, status })
            }
            PaymentApplication::Duplicate(invoice) => {
                tracing::info!(
                    invoice_id = %invoice_id,
                    session_id,
                    amount_paid = invoice.amount_paid,
                    "Duplicate payment session ignored"
                );
                Ok(PaymentOutcome::AlreadyApplied)
            }
        }
    }

    async fn notify_generated(&self, invoice: &GroupInvoice) {
        let payload = serde_json::json!({
            "invoice_id": invoice.id,
            "group_id": invoice.group_id,
            "amount_owed": invoice.amount_owed,
            "period_start": invoice.period_start,
            "period_end": invoice.period_end,
        });
        if let Err(err) = self
            .notifier
            .notify(NotificationKind::InvoiceGenerated, payload)
            .await
        {
            tracing::warn!(invoice_id = %invoice.id, error = %err, "Invoice notification failed");
        }
    }
}
