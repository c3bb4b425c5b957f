//! Payment confirmation and fulfillment.
//!
//! Three entry points can report the same successful payment: the
//! synchronous capture call, the Stripe webhook, and the Windcave FPRN
//! poll. The orchestrator collapses them onto a single `pending ->
//! completed` transition guarded by a conditional update, so fulfillment
//! side effects run exactly once per order. Every side effect after the
//! transition is best-effort: a late failure is reported, never rolled
//! back into the order status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tessera_billing::{UsageFlags, UsageOutcome, UsageTracker};
use tessera_core::notify::{NotificationKind, Notifier, ReceiptSender};
use tessera_core::payment::{
    CardDetails, PaymentAdapter, PaymentSession, SessionState,
};
use tessera_core::tax::TaxBreakdown;
use tessera_core::{CoreError, CoreResult};
use tessera_ledger::{AllocationLedger, SaleRequest};
use uuid::Uuid;

use crate::models::{ItemKind, Order, OrderStatus, Ticket};
use crate::repository::OrderRepository;

/// A provider-reported payment outcome, normalized across entry points.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub session_id: String,
    pub state: SessionState,
    pub card: Option<CardDetails>,
    pub breakdown: Option<TaxBreakdown>,
}

#[derive(Debug, Clone)]
pub enum FulfillmentOutcome {
    /// This invocation won the transition and ran the side effects.
    Completed(FulfillmentReport),
    /// The order was already terminal; nothing was repeated.
    AlreadyCompleted,
    /// Non-success provider state inside the retry window.
    StillPending,
    /// Declined past the retry window, or a hard provider failure.
    Failed,
}

/// Per-step results of one fulfillment run. Step failures land in
/// `step_errors` without aborting later steps.
#[derive(Debug, Clone, Default)]
pub struct FulfillmentReport {
    pub tickets_created: usize,
    pub email_sent: bool,
    pub usage_recorded: bool,
    pub group_sales_recorded: usize,
    pub step_errors: Vec<String>,
}

pub struct FulfillmentOrchestrator {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<AllocationLedger>,
    usage: Arc<UsageTracker>,
    email: Arc<dyn ReceiptSender>,
    notifier: Arc<dyn Notifier>,
    retry_window: Duration,
}

impl FulfillmentOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<AllocationLedger>,
        usage: Arc<UsageTracker>,
        email: Arc<dyn ReceiptSender>,
        notifier: Arc<dyn Notifier>,
        retry_window: Duration,
    ) -> Self {
        Self {
            orders,
            ledger,
            usage,
            email,
            notifier,
            retry_window,
        }
    }

    /// Drive the order state machine from a provider-reported outcome.
    pub async fn process_confirmation(
        &self,
        order_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> CoreResult<FulfillmentOutcome> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| CoreError::not_found("order", order_id))?;

        // Terminal guard before any side effect: duplicate notifications
        // for an already-fulfilled order are a success no-op.
        if order.status.is_terminal_success() {
            tracing::info!(order_id = %order_id, "Order already completed, ignoring duplicate confirmation");
            return Ok(FulfillmentOutcome::AlreadyCompleted);
        }
        if order.status == OrderStatus::Failed {
            return Ok(FulfillmentOutcome::Failed);
        }

        match confirmation.state {
            SessionState::Succeeded => self.complete(order, confirmation).await,
            state if state.is_retriable() => {
                // Stay pending until the retry window closes, then fail.
                if Utc::now() - order.created_at > self.retry_window {
                    self.orders.try_fail(order_id).await?;
                    tracing::info!(order_id = %order_id, ?state, "Retry window elapsed, order failed");
                    Ok(FulfillmentOutcome::Failed)
                } else {
                    tracing::info!(order_id = %order_id, ?state, "Payment not yet successful, order stays pending");
                    Ok(FulfillmentOutcome::StillPending)
                }
            }
            state => {
                self.orders.try_fail(order_id).await?;
                tracing::info!(order_id = %order_id, ?state, "Provider reported terminal failure");
                Ok(FulfillmentOutcome::Failed)
            }
        }
    }

    /// FPRN-style fail-safe: resolve the session to an order, ask the
    /// provider for the session state, and drive the state machine.
    pub async fn process_session_poll(
        &self,
        adapter: &dyn PaymentAdapter,
        session_id: &str,
    ) -> CoreResult<FulfillmentOutcome> {
        let order = self
            .orders
            .find_by_session(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("order for session", session_id))?;

        let session: PaymentSession = adapter.get_session_status(session_id).await?;
        let confirmation = PaymentConfirmation {
            session_id: session.id.clone(),
            state: session.state,
            card: session.card,
            breakdown: None,
        };
        self.process_confirmation(order.id, confirmation).await
    }

    /// Fail orders that sat pending past the retry window. Invoked on a
    /// schedule, not from checkout traffic.
    pub async fn sweep_expired(&self) -> CoreResult<usize> {
        let cutoff = Utc::now() - self.retry_window;
        let expired = self.orders.expire_pending_before(cutoff).await?;
        for order_id in &expired {
            tracing::info!(order_id = %order_id, "Pending order expired to failed");
        }
        Ok(expired.len())
    }

    async fn complete(
        &self,
        order: Order,
        confirmation: PaymentConfirmation,
    ) -> CoreResult<FulfillmentOutcome> {
        // The winner of this conditional update owns the side effects;
        // everyone else observes zero rows and backs off.
        if !self.orders.try_complete(order.id).await? {
            tracing::info!(order_id = %order.id, "Lost completion race, treating as already fulfilled");
            return Ok(FulfillmentOutcome::AlreadyCompleted);
        }
        tracing::info!(order_id = %order.id, session_id = %confirmation.session_id, "Order completed, fulfilling");

        let mut report = FulfillmentReport::default();

        // 1. Payment metadata and final fee breakdown
        if let Err(err) = self
            .orders
            .set_payment_details(
                order.id,
                confirmation.card.as_ref(),
                confirmation.breakdown.as_ref(),
            )
            .await
        {
            report.step_errors.push(format!("payment details: {err}"));
            tracing::warn!(order_id = %order.id, error = %err, "Failed to persist payment details");
        }

        // 2. Tickets: one per unit quantity, never re-created
        let items = self.orders.get_items(order.id).await?;
        let mut order_tickets: Vec<Ticket> = Vec::new();
        for item in items.iter().filter(|i| i.kind == ItemKind::TicketType) {
            let existing = self.orders.tickets_for_item(item.id).await?;
            if !existing.is_empty() {
                tracing::debug!(order_item_id = %item.id, "Tickets already exist, skipping creation");
                order_tickets.extend(existing);
                continue;
            }
            let new_tickets: Vec<Ticket> = (0..item.quantity)
                .map(|seq| Ticket::new(order.id, item.id, seq))
                .collect();
            match self.orders.insert_tickets(&new_tickets).await {
                Ok(()) => {
                    report.tickets_created += new_tickets.len();
                    order_tickets.extend(new_tickets);
                }
                Err(err) => {
                    report.step_errors.push(format!("tickets for {}: {err}", item.id));
                    tracing::error!(order_item_id = %item.id, error = %err, "Ticket creation failed");
                }
            }
        }

        // 3. Receipt email, once, failure logged and not retried here
        match self.email.send_order_receipt(order.id).await {
            Ok(()) => report.email_sent = true,
            Err(err) => {
                report.step_errors.push(format!("receipt email: {err}"));
                tracing::warn!(order_id = %order.id, error = %err, "Receipt email failed");
            }
        }

        // 4. Platform-fee usage, idempotent by order id
        let flags = UsageFlags {
            test_mode: order.test_mode,
            free_event: order.free_event,
            donation_only: Order::is_donation_only(&items),
        };
        match self
            .usage
            .track(order.id, order.organization_id, order.total, flags, Utc::now())
            .await
        {
            Ok(UsageOutcome::Recorded(_)) | Ok(UsageOutcome::AlreadyRecorded) => {
                report.usage_recorded = true;
            }
            Ok(UsageOutcome::Skipped(reason)) => {
                tracing::debug!(order_id = %order.id, ?reason, "Usage skipped");
            }
            Err(err) => {
                report.step_errors.push(format!("usage: {err}"));
                tracing::error!(order_id = %order.id, error = %err, "Usage tracking failed");
            }
        }

        // 5. Group allocation accounting, one ledger entry per ticket
        if let Some(allocation_id) = order.allocation_id {
            for ticket in &order_tickets {
                let item = items.iter().find(|i| i.id == ticket.order_item_id);
                let Some(item) = item else { continue };
                let result = self
                    .ledger
                    .record_sale(SaleRequest {
                        allocation_id,
                        order_id: order.id,
                        ticket_id: ticket.id,
                        list_price: item.list_price,
                        paid_price: item.unit_price,
                    })
                    .await;
                match result {
                    Ok(_) => report.group_sales_recorded += 1,
                    Err(err) => {
                        report.step_errors.push(format!("group sale {}: {err}", ticket.id));
                        tracing::error!(ticket_id = %ticket.id, error = %err, "Group sale recording failed");
                    }
                }
            }
        }

        let payload = serde_json::json!({
            "order_id": order.id,
            "event_id": order.event_id,
            "tickets": order_tickets.len(),
            "total": order.total,
        });
        let notifier = self.notifier.clone();
        crate::tasks::spawn_best_effort("purchase_notification", async move {
            notifier.notify(NotificationKind::TicketPurchased, payload).await
        });

        Ok(FulfillmentOutcome::Completed(report))
    }
}

/// Adapter stub that reports success for every session. Test use only.
pub struct MockPaymentAdapter;

#[async_trait]
impl PaymentAdapter for MockPaymentAdapter {
    async fn create_session(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        _metadata: serde_json::Value,
    ) -> CoreResult<PaymentSession> {
        Ok(PaymentSession {
            id: format!("mock_pi_{}", order_id.simple()),
            order_id,
            amount,
            currency: currency.to_string(),
            state: SessionState::Pending,
            client_secret: Some("mock_secret_123".to_string()),
            redirect_url: None,
            card: None,
            created_at: Utc::now(),
        })
    }

    async fn get_session_status(&self, session_id: &str) -> CoreResult<PaymentSession> {
        let order_id = session_id
            .strip_prefix("mock_pi_")
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);
        Ok(PaymentSession {
            id: session_id.to_string(),
            order_id,
            amount: 1_000,
            currency: "NZD".to_string(),
            state: SessionState::Succeeded,
            client_secret: None,
            redirect_url: None,
            card: Some(CardDetails {
                brand: "visa".to_string(),
                last4: "4242".to_string(),
            }),
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderItem;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tessera_billing::{BillingCustomer, BillingRepository, GroupInvoice, InvoiceLineItem,
        PaymentApplication, PlatformFeeConfig, UsageRecord};
    use tessera_ledger::{
        AllocationRepository, GroupTicketAllocation, GroupTicketSale, SalePaymentStatus,
    };

    // ------------------------------------------------------------------
    // In-memory collaborators
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryOrderRepo {
        orders: Mutex<HashMap<Uuid, Order>>,
        items: Mutex<Vec<OrderItem>>,
        tickets: Mutex<Vec<Ticket>>,
    }

    #[async_trait]
    impl OrderRepository for MemoryOrderRepo {
        async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>> {
            Ok(self.orders.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_session(&self, session_id: &str) -> CoreResult<Option<Order>> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .values()
                .find(|o| o.provider_session_id.as_deref() == Some(session_id))
                .cloned())
        }

        async fn get_items(&self, order_id: Uuid) -> CoreResult<Vec<OrderItem>> {
            Ok(self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.order_id == order_id)
                .cloned()
                .collect())
        }

        async fn try_complete(&self, order_id: Uuid) -> CoreResult<bool> {
            let mut orders = self.orders.lock().unwrap();
            let order = orders.get_mut(&order_id).unwrap();
            if matches!(order.status, OrderStatus::Pending | OrderStatus::Processing) {
                order.status = OrderStatus::Completed;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn try_fail(&self, order_id: Uuid) -> CoreResult<bool> {
            let mut orders = self.orders.lock().unwrap();
            let order = orders.get_mut(&order_id).unwrap();
            if matches!(order.status, OrderStatus::Pending | OrderStatus::Processing) {
                order.status = OrderStatus::Failed;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn set_payment_details(
            &self,
            order_id: Uuid,
            card: Option<&CardDetails>,
            _breakdown: Option<&TaxBreakdown>,
        ) -> CoreResult<()> {
            let mut orders = self.orders.lock().unwrap();
            orders.get_mut(&order_id).unwrap().payment_card = card.cloned();
            Ok(())
        }

        async fn tickets_for_item(&self, order_item_id: Uuid) -> CoreResult<Vec<Ticket>> {
            Ok(self
                .tickets
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.order_item_id == order_item_id)
                .cloned()
                .collect())
        }

        async fn insert_tickets(&self, tickets: &[Ticket]) -> CoreResult<()> {
            self.tickets.lock().unwrap().extend_from_slice(tickets);
            Ok(())
        }

        async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Uuid>> {
            let mut expired = Vec::new();
            let mut orders = self.orders.lock().unwrap();
            for order in orders.values_mut() {
                if order.status == OrderStatus::Pending && order.created_at < cutoff {
                    order.status = OrderStatus::Failed;
                    expired.push(order.id);
                }
            }
            Ok(expired)
        }
    }

    #[derive(Default)]
    struct MemoryBillingRepo {
        usage: Mutex<Vec<UsageRecord>>,
    }

    #[async_trait]
    impl BillingRepository for MemoryBillingRepo {
        async fn get_billing_customer(&self, _id: Uuid) -> CoreResult<Option<BillingCustomer>> {
            Ok(None)
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
            _org: Uuid,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> CoreResult<Vec<UsageRecord>> {
            Ok(vec![])
        }

        async fn unbilled_group_sales(
            &self,
            _group: Uuid,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> CoreResult<Vec<GroupTicketSale>> {
            Ok(vec![])
        }

        async fn create_group_invoice(
            &self,
            _invoice: &GroupInvoice,
            _items: &[InvoiceLineItem],
            _sale_ids: &[Uuid],
        ) -> CoreResult<()> {
            Ok(())
        }

        async fn create_usage_invoice(
            &self,
            _invoice: &GroupInvoice,
            _items: &[InvoiceLineItem],
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
            Err(CoreError::not_found("invoice", invoice_id))
        }
    }

    #[derive(Default)]
    struct MemoryAllocationRepo {
        allocations: Mutex<HashMap<Uuid, GroupTicketAllocation>>,
        sales: Mutex<Vec<GroupTicketSale>>,
    }

    #[async_trait]
    impl AllocationRepository for MemoryAllocationRepo {
        async fn get_allocation(&self, id: Uuid) -> CoreResult<Option<GroupTicketAllocation>> {
            Ok(self.allocations.lock().unwrap().get(&id).cloned())
        }

        async fn try_record_sale(
            &self,
            sale: &GroupTicketSale,
        ) -> CoreResult<Option<GroupTicketAllocation>> {
            let mut allocations = self.allocations.lock().unwrap();
            let alloc = allocations.get_mut(&sale.allocation_id).unwrap();
            if alloc.used_quantity + alloc.reserved_quantity >= alloc.allocated_quantity {
                return Ok(None);
            }
            alloc.used_quantity += 1;
            self.sales.lock().unwrap().push(sale.clone());
            Ok(Some(alloc.clone()))
        }

        async fn find_sale_by_ticket(
            &self,
            ticket_id: Uuid,
        ) -> CoreResult<Option<GroupTicketSale>> {
            Ok(self
                .sales
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.ticket_id == ticket_id)
                .cloned())
        }

        async fn refund_sale(&self, sale_id: Uuid) -> CoreResult<Option<GroupTicketAllocation>> {
            let allocation_id = {
                let mut sales = self.sales.lock().unwrap();
                let sale = sales.iter_mut().find(|s| s.id == sale_id).unwrap();
                if sale.payment_status == SalePaymentStatus::Refunded {
                    return Ok(None);
                }
                sale.payment_status = SalePaymentStatus::Refunded;
                sale.allocation_id
            };
            let mut allocations = self.allocations.lock().unwrap();
            let alloc = allocations.get_mut(&allocation_id).unwrap();
            alloc.used_quantity -= 1;
            Ok(Some(alloc.clone()))
        }

        async fn set_low_stock_watermark(
            &self,
            allocation_id: Uuid,
            remaining: Option<i32>,
        ) -> CoreResult<()> {
            let mut allocations = self.allocations.lock().unwrap();
            allocations
                .get_mut(&allocation_id)
                .unwrap()
                .low_stock_notified_remaining = remaining;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingEmail {
        sent: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ReceiptSender for CountingEmail {
        async fn send_order_receipt(&self, _order_id: Uuid) -> CoreResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::Integration {
                    step: "email",
                    detail: "smtp unreachable".to_string(),
                });
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(
            &self,
            _kind: NotificationKind,
            _payload: serde_json::Value,
        ) -> CoreResult<()> {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    struct Fixture {
        orders: Arc<MemoryOrderRepo>,
        billing: Arc<MemoryBillingRepo>,
        allocations: Arc<MemoryAllocationRepo>,
        email: Arc<CountingEmail>,
        orchestrator: FulfillmentOrchestrator,
    }

    fn fixture() -> Fixture {
        let orders = Arc::new(MemoryOrderRepo::default());
        let billing = Arc::new(MemoryBillingRepo::default());
        let allocations = Arc::new(MemoryAllocationRepo::default());
        let email = Arc::new(CountingEmail::default());
        let notifier = Arc::new(NullNotifier);
        let ledger = Arc::new(AllocationLedger::new(allocations.clone(), notifier.clone()));
        let usage = Arc::new(UsageTracker::new(
            billing.clone(),
            PlatformFeeConfig::default(),
        ));
        let orchestrator = FulfillmentOrchestrator::new(
            orders.clone(),
            ledger,
            usage,
            email.clone(),
            notifier,
            Duration::minutes(30),
        );
        Fixture {
            orders,
            billing,
            allocations,
            email,
            orchestrator,
        }
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            subtotal: 9_000,
            booking_fee: 300,
            tax_total: 1_350,
            total: 9_300,
            currency: "NZD".to_string(),
            status,
            provider_session_id: Some("pi_test_1".to_string()),
            idempotency_key: None,
            payment_card: None,
            group_id: None,
            allocation_id: None,
            test_mode: false,
            free_event: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(order_id: Uuid, kind: ItemKind, quantity: i32) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id,
            kind,
            product_id: Some(Uuid::new_v4()),
            name: "GA ticket".to_string(),
            quantity,
            unit_price: 3_000,
            list_price: 3_000,
            created_at: Utc::now(),
        }
    }

    fn succeeded() -> PaymentConfirmation {
        PaymentConfirmation {
            session_id: "pi_test_1".to_string(),
            state: SessionState::Succeeded,
            card: Some(CardDetails {
                brand: "visa".to_string(),
                last4: "4242".to_string(),
            }),
            breakdown: None,
        }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_duplicate_confirmation_fulfills_exactly_once() {
        let fx = fixture();
        let order = order(OrderStatus::Pending);
        let order_id = order.id;
        fx.orders.orders.lock().unwrap().insert(order_id, order);
        {
            let mut items = fx.orders.items.lock().unwrap();
            items.push(item(order_id, ItemKind::TicketType, 1));
            items.push(item(order_id, ItemKind::TicketType, 2));
        }

        // first confirmation wins and fulfills
        let out = fx
            .orchestrator
            .process_confirmation(order_id, succeeded())
            .await
            .unwrap();
        match out {
            FulfillmentOutcome::Completed(report) => {
                assert_eq!(report.tickets_created, 3);
                assert!(report.email_sent);
                assert!(report.usage_recorded);
                assert!(report.step_errors.is_empty());
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        // duplicate webhook: nothing is repeated
        let out = fx
            .orchestrator
            .process_confirmation(order_id, succeeded())
            .await
            .unwrap();
        assert!(matches!(out, FulfillmentOutcome::AlreadyCompleted));

        assert_eq!(fx.orders.tickets.lock().unwrap().len(), 3);
        assert_eq!(fx.billing.usage.lock().unwrap().len(), 1);
        assert_eq!(fx.email.sent.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.orders.orders.lock().unwrap()[&order_id].status,
            OrderStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_email_failure_does_not_abort_fulfillment() {
        let fx = fixture();
        fx.email.fail.store(true, Ordering::SeqCst);
        let order = order(OrderStatus::Pending);
        let order_id = order.id;
        fx.orders.orders.lock().unwrap().insert(order_id, order);
        fx.orders
            .items
            .lock()
            .unwrap()
            .push(item(order_id, ItemKind::TicketType, 1));

        let out = fx
            .orchestrator
            .process_confirmation(order_id, succeeded())
            .await
            .unwrap();
        match out {
            FulfillmentOutcome::Completed(report) => {
                assert!(!report.email_sent);
                assert_eq!(report.tickets_created, 1);
                assert_eq!(report.step_errors.len(), 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(
            fx.orders.orders.lock().unwrap()[&order_id].status,
            OrderStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_decline_keeps_order_pending_inside_window() {
        let fx = fixture();
        let order = order(OrderStatus::Pending);
        let order_id = order.id;
        fx.orders.orders.lock().unwrap().insert(order_id, order);

        let confirmation = PaymentConfirmation {
            state: SessionState::Declined,
            ..succeeded()
        };
        let out = fx
            .orchestrator
            .process_confirmation(order_id, confirmation)
            .await
            .unwrap();
        assert!(matches!(out, FulfillmentOutcome::StillPending));
        assert_eq!(
            fx.orders.orders.lock().unwrap()[&order_id].status,
            OrderStatus::Pending
        );
        assert!(fx.orders.tickets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decline_past_window_fails_order() {
        let fx = fixture();
        let mut order = order(OrderStatus::Pending);
        order.created_at = Utc::now() - Duration::hours(2);
        let order_id = order.id;
        fx.orders.orders.lock().unwrap().insert(order_id, order);

        let confirmation = PaymentConfirmation {
            state: SessionState::Declined,
            ..succeeded()
        };
        let out = fx
            .orchestrator
            .process_confirmation(order_id, confirmation)
            .await
            .unwrap();
        assert!(matches!(out, FulfillmentOutcome::Failed));
        assert_eq!(
            fx.orders.orders.lock().unwrap()[&order_id].status,
            OrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_group_order_records_ledger_sales() {
        let fx = fixture();
        let allocation = GroupTicketAllocation {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            ticket_type_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            allocated_quantity: 50,
            used_quantity: 0,
            reserved_quantity: 0,
            full_price: 4_500,
            minimum_price: 2_000,
            low_stock_notified_remaining: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let allocation_id = allocation.id;
        fx.allocations
            .allocations
            .lock()
            .unwrap()
            .insert(allocation_id, allocation);

        let mut order = order(OrderStatus::Pending);
        order.group_id = Some(Uuid::new_v4());
        order.allocation_id = Some(allocation_id);
        let order_id = order.id;
        fx.orders.orders.lock().unwrap().insert(order_id, order);
        // list $50, customer pays $40: the recorded discount must be $10
        let mut group_item = item(order_id, ItemKind::TicketType, 2);
        group_item.list_price = 5_000;
        group_item.unit_price = 4_000;
        fx.orders.items.lock().unwrap().push(group_item);

        let out = fx
            .orchestrator
            .process_confirmation(order_id, succeeded())
            .await
            .unwrap();
        match out {
            FulfillmentOutcome::Completed(report) => {
                assert_eq!(report.tickets_created, 2);
                assert_eq!(report.group_sales_recorded, 2);
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let sales = fx.allocations.sales.lock().unwrap();
        assert_eq!(sales.len(), 2);
        assert!(sales.iter().all(|s| s.discount() == 1_000));
        let allocations = fx.allocations.allocations.lock().unwrap();
        assert_eq!(allocations[&allocation_id].used_quantity, 2);
    }

    #[tokio::test]
    async fn test_fprn_poll_completes_via_adapter() {
        let fx = fixture();
        let mut order = order(OrderStatus::Pending);
        order.provider_session_id = Some(format!("mock_pi_{}", order.id.simple()));
        let session_id = order.provider_session_id.clone().unwrap();
        let order_id = order.id;
        fx.orders.orders.lock().unwrap().insert(order_id, order);
        fx.orders
            .items
            .lock()
            .unwrap()
            .push(item(order_id, ItemKind::TicketType, 1));

        let adapter = MockPaymentAdapter;
        let out = fx
            .orchestrator
            .process_session_poll(&adapter, &session_id)
            .await
            .unwrap();
        assert!(matches!(out, FulfillmentOutcome::Completed(_)));
        // card metadata from the session lands on the order
        let orders = fx.orders.orders.lock().unwrap();
        assert_eq!(
            orders[&order_id].payment_card.as_ref().unwrap().last4,
            "4242"
        );
    }

    #[tokio::test]
    async fn test_sweep_expires_stale_pending_orders() {
        let fx = fixture();
        let mut stale = order(OrderStatus::Pending);
        stale.created_at = Utc::now() - Duration::hours(3);
        let stale_id = stale.id;
        let fresh = order(OrderStatus::Pending);
        let fresh_id = fresh.id;
        {
            let mut orders = fx.orders.orders.lock().unwrap();
            orders.insert(stale_id, stale);
            orders.insert(fresh_id, fresh);
        }

        assert_eq!(fx.orchestrator.sweep_expired().await.unwrap(), 1);
        let orders = fx.orders.orders.lock().unwrap();
        assert_eq!(orders[&stale_id].status, OrderStatus::Failed);
        assert_eq!(orders[&fresh_id].status, OrderStatus::Pending);
    }
}
