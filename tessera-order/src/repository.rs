use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tessera_core::payment::CardDetails;
use tessera_core::tax::TaxBreakdown;
use tessera_core::CoreResult;
use uuid::Uuid;

use crate::models::{Order, OrderItem, Ticket};

/// Data access for orders and tickets.
///
/// `try_complete` is the fulfillment race guard: it must be a conditional
/// update (`... WHERE status IN ('pending', 'processing')`) so that of two
/// concurrent fulfillment attempts exactly one observes `true`.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>>;

    async fn find_by_session(&self, session_id: &str) -> CoreResult<Option<Order>>;

    async fn get_items(&self, order_id: Uuid) -> CoreResult<Vec<OrderItem>>;

    /// Conditionally transition to `completed`. Returns `false` when the
    /// order was not in a completable state (someone else won the race, or
    /// it already failed).
    async fn try_complete(&self, order_id: Uuid) -> CoreResult<bool>;

    /// Conditionally transition a still-pending order to `failed`.
    async fn try_fail(&self, order_id: Uuid) -> CoreResult<bool>;

    /// Persist payment method metadata and the final fee breakdown.
    async fn set_payment_details(
        &self,
        order_id: Uuid,
        card: Option<&CardDetails>,
        breakdown: Option<&TaxBreakdown>,
    ) -> CoreResult<()>;

    async fn tickets_for_item(&self, order_item_id: Uuid) -> CoreResult<Vec<Ticket>>;

    async fn insert_tickets(&self, tickets: &[Ticket]) -> CoreResult<()>;

    /// Fail orders still pending past the retry window. Returns the ids of
    /// the orders transitioned.
    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Uuid>>;
}
