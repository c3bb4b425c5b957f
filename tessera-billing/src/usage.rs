//! Usage-based platform fee tracking.
//!
//! One usage record per completed order, accumulated into billing periods
//! aligned to the organization's billing cycle (calendar month when no
//! cycle is configured).

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::money::{apply_rate, percent_to_basis_points};
use tessera_core::CoreResult;
use uuid::Uuid;

use crate::models::{BillingCycle, UsageRecord};
use crate::repository::BillingRepository;

/// Platform-wide fee defaults: 1.00% + $0.50 per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformFeeConfig {
    pub percent: f64,
    pub fixed_cents: i64,
}

impl Default for PlatformFeeConfig {
    fn default() -> Self {
        Self {
            percent: 1.0,
            fixed_cents: 50,
        }
    }
}

impl PlatformFeeConfig {
    pub fn fee_for(&self, amount_cents: i64) -> i64 {
        apply_rate(amount_cents, percent_to_basis_points(self.percent)) + self.fixed_cents
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageFlags {
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub free_event: bool,
    #[serde(default)]
    pub donation_only: bool,
}

/// Reason code for a skipped usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TestMode,
    FreeEvent,
    DonationOnly,
    ZeroAmount,
}

#[derive(Debug, Clone)]
pub enum UsageOutcome {
    Recorded(UsageRecord),
    /// A record for this order already exists; duplicate invocations of the
    /// fulfillment path collapse to success here.
    AlreadyRecorded,
    Skipped(SkipReason),
}

/// The billing period containing `now`: the organization's cycle window
/// `[next_billing_at - interval, next_billing_at)` when one is configured,
/// else the calendar month.
pub fn billing_period(
    cycle: Option<&BillingCycle>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    if let Some(cycle) = cycle {
        let end = cycle.next_billing_at;
        let start = end - Duration::days(cycle.interval_days);
        return (start, end);
    }

    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap();
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .unwrap();
    (start, end)
}

pub struct UsageTracker {
    repo: Arc<dyn BillingRepository>,
    fees: PlatformFeeConfig,
}

impl UsageTracker {
    pub fn new(repo: Arc<dyn BillingRepository>, fees: PlatformFeeConfig) -> Self {
        Self { repo, fees }
    }

    /// Record the platform fee for one completed order. Idempotent by
    /// order id; never records for test-mode, free, donation-only or
    /// zero-amount orders.
    pub async fn track(
        &self,
        order_id: Uuid,
        organization_id: Uuid,
        amount: i64,
        flags: UsageFlags,
        now: DateTime<Utc>,
    ) -> CoreResult<UsageOutcome> {
        if flags.test_mode {
            return Ok(UsageOutcome::Skipped(SkipReason::TestMode));
        }
        if flags.free_event {
            return Ok(UsageOutcome::Skipped(SkipReason::FreeEvent));
        }
        if flags.donation_only {
            return Ok(UsageOutcome::Skipped(SkipReason::DonationOnly));
        }
        if amount <= 0 {
            return Ok(UsageOutcome::Skipped(SkipReason::ZeroAmount));
        }

        let customer = self.repo.get_billing_customer(organization_id).await?;
        let cycle = customer.as_ref().and_then(|c| c.cycle.as_ref());
        let (period_start, period_end) = billing_period(cycle, now);

        let record = UsageRecord {
            id: Uuid::new_v4(),
            order_id,
            organization_id,
            transaction_amount: amount,
            fee_percentage: self.fees.percent,
            fee_fixed: self.fees.fixed_cents,
            total_fee: self.fees.fee_for(amount),
            billing_period_start: period_start,
            billing_period_end: period_end,
            billed: false,
            invoice_id: None,
            created_at: now,
        };

        if self.repo.insert_usage(&record).await? {
            tracing::info!(
                order_id = %order_id,
                organization_id = %organization_id,
                total_fee = record.total_fee,
                "Usage recorded"
            );
            Ok(UsageOutcome::Recorded(record))
        } else {
            tracing::debug!(order_id = %order_id, "Usage already recorded, skipping");
            Ok(UsageOutcome::AlreadyRecorded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillingCustomer;
    use crate::repository::PaymentApplication;
    use crate::models::{GroupInvoice, InvoiceLineItem};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tessera_ledger::GroupTicketSale;

    #[derive(Default)]
    pub(crate) struct MemoryBillingRepo {
        pub customers: Mutex<HashMap<Uuid, BillingCustomer>>,
        pub usage: Mutex<Vec<UsageRecord>>,
    }

    #[async_trait]
    impl BillingRepository for MemoryBillingRepo {
        async fn get_billing_customer(
            &self,
            subject_id: Uuid,
        ) -> CoreResult<Option<BillingCustomer>> {
            Ok(self.customers.lock().unwrap().get(&subject_id).cloned())
        }

        async fn insert_usage(&self, record: &UsageRecord) -> CoreResult<bool> {
            let mut usage = self.usage.lock().unwrap();
            if usage.iter().any(|u| u.order_id == record.order_id) {
                return Ok(false);
            }
            usage.push(record.clone());
            Ok(true)
        }

        async fn unbilled_usage(
            &self,
            organization_id: Uuid,
            period_start: DateTime<Utc>,
            period_end: DateTime<Utc>,
        ) -> CoreResult<Vec<UsageRecord>> {
            Ok(self
                .usage
                .lock()
                .unwrap()
                .iter()
                .filter(|u| {
                    u.organization_id == organization_id
                        && !u.billed
                        && u.created_at >= period_start
                        && u.created_at < period_end
                })
                .cloned()
                .collect())
        }

        async fn unbilled_group_sales(
            &self,
            _group_id: Uuid,
            _period_start: DateTime<Utc>,
            _period_end: DateTime<Utc>,
        ) -> CoreResult<Vec<GroupTicketSale>> {
            Ok(vec![])
        }

        async fn create_group_invoice(
            &self,
            _invoice: &GroupInvoice,
            _line_items: &[InvoiceLineItem],
            _sale_ids: &[Uuid],
        ) -> CoreResult<()> {
            Ok(())
        }

        async fn create_usage_invoice(
            &self,
            _invoice: &GroupInvoice,
            _line_items: &[InvoiceLineItem],
            _usage_ids: &[Uuid],
        ) -> CoreResult<()> {
            Ok(())
        }

        async fn get_invoice(&self, _id: Uuid) -> CoreResult<Option<GroupInvoice>> {
            Ok(None)
        }

        async fn apply_invoice_payment(
            &self,
            invoice_id: Uuid,
            _session_id: &str,
            _amount: i64,
        ) -> CoreResult<PaymentApplication> {
            Err(tessera_core::CoreError::not_found("invoice", invoice_id))
        }
    }

    fn tracker() -> (UsageTracker, Arc<MemoryBillingRepo>) {
        let repo = Arc::new(MemoryBillingRepo::default());
        (
            UsageTracker::new(repo.clone(), PlatformFeeConfig::default()),
            repo,
        )
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let (tracker, repo) = tracker();
        let org = Uuid::new_v4();
        let now = Utc::now();

        let flags = UsageFlags {
            test_mode: true,
            ..Default::default()
        };
        let out = tracker.track(Uuid::new_v4(), org, 5_000, flags, now).await.unwrap();
        assert!(matches!(out, UsageOutcome::Skipped(SkipReason::TestMode)));

        let flags = UsageFlags {
            free_event: true,
            ..Default::default()
        };
        let out = tracker.track(Uuid::new_v4(), org, 5_000, flags, now).await.unwrap();
        assert!(matches!(out, UsageOutcome::Skipped(SkipReason::FreeEvent)));

        let flags = UsageFlags {
            donation_only: true,
            ..Default::default()
        };
        let out = tracker.track(Uuid::new_v4(), org, 5_000, flags, now).await.unwrap();
        assert!(matches!(out, UsageOutcome::Skipped(SkipReason::DonationOnly)));

        let out = tracker
            .track(Uuid::new_v4(), org, 0, UsageFlags::default(), now)
            .await
            .unwrap();
        assert!(matches!(out, UsageOutcome::Skipped(SkipReason::ZeroAmount)));

        assert!(repo.usage.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fee_computation() {
        // $20.00 -> 1% + $0.50 = $0.70
        let (tracker, _) = tracker();
        let out = tracker
            .track(Uuid::new_v4(), Uuid::new_v4(), 2_000, UsageFlags::default(), Utc::now())
            .await
            .unwrap();
        match out {
            UsageOutcome::Recorded(record) => assert_eq!(record.total_fee, 70),
            other => panic!("expected Recorded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idempotent_by_order_id() {
        let (tracker, repo) = tracker();
        let order_id = Uuid::new_v4();
        let org = Uuid::new_v4();
        let now = Utc::now();

        let first = tracker
            .track(order_id, org, 2_000, UsageFlags::default(), now)
            .await
            .unwrap();
        assert!(matches!(first, UsageOutcome::Recorded(_)));

        let second = tracker
            .track(order_id, org, 2_000, UsageFlags::default(), now)
            .await
            .unwrap();
        assert!(matches!(second, UsageOutcome::AlreadyRecorded));
        assert_eq!(repo.usage.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_billing_period_from_cycle() {
        let next = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        let cycle = BillingCycle {
            interval_days: 30,
            next_billing_at: next,
        };
        let (start, end) = billing_period(Some(&cycle), Utc::now());
        assert_eq!(end, next);
        assert_eq!(start, next - Duration::days(30));
    }

    #[test]
    fn test_billing_period_calendar_month_fallback() {
        let now = Utc.with_ymd_and_hms(2026, 12, 20, 10, 30, 0).unwrap();
        let (start, end) = billing_period(None, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }
}
