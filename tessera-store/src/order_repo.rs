use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tessera_core::payment::CardDetails;
use tessera_core::tax::TaxBreakdown;
use tessera_core::{CoreError, CoreResult};
use tessera_order::models::{ItemKind, Order, OrderItem, OrderStatus, Ticket, TicketStatus};
use tessera_order::repository::OrderRepository;
use uuid::Uuid;

use crate::storage_err;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    event_id: Uuid,
    organization_id: Uuid,
    customer_name: String,
    customer_email: String,
    subtotal: i64,
    booking_fee: i64,
    tax_total: i64,
    total: i64,
    currency: String,
    status: String,
    provider_session_id: Option<String>,
    idempotency_key: Option<String>,
    card_brand: Option<String>,
    card_last4: Option<String>,
    group_id: Option<Uuid>,
    allocation_id: Option<Uuid>,
    test_mode: bool,
    free_event: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    kind: String,
    product_id: Option<Uuid>,
    name: String,
    quantity: i32,
    unit_price: i64,
    list_price: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    order_id: Uuid,
    order_item_id: Uuid,
    seq: i32,
    code: String,
    status: String,
    checked_in: bool,
    created_at: DateTime<Utc>,
}

fn parse_order_status(s: &str) -> CoreResult<OrderStatus> {
    match s {
        "pending" => Ok(OrderStatus::Pending),
        "processing" => Ok(OrderStatus::Processing),
        "completed" => Ok(OrderStatus::Completed),
        "failed" => Ok(OrderStatus::Failed),
        "refunded" => Ok(OrderStatus::Refunded),
        other => Err(CoreError::Storage(format!("unknown order status: {other}"))),
    }
}

fn parse_item_kind(s: &str) -> CoreResult<ItemKind> {
    match s {
        "ticket_type" => Ok(ItemKind::TicketType),
        "merchandise" => Ok(ItemKind::Merchandise),
        "donation" => Ok(ItemKind::Donation),
        other => Err(CoreError::Storage(format!("unknown item kind: {other}"))),
    }
}

fn parse_ticket_status(s: &str) -> CoreResult<TicketStatus> {
    match s {
        "valid" => Ok(TicketStatus::Valid),
        "used" => Ok(TicketStatus::Used),
        "refunded" => Ok(TicketStatus::Refunded),
        other => Err(CoreError::Storage(format!("unknown ticket status: {other}"))),
    }
}

fn ticket_status_str(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Valid => "valid",
        TicketStatus::Used => "used",
        TicketStatus::Refunded => "refunded",
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = CoreError;

    fn try_from(row: OrderRow) -> CoreResult<Self> {
        let payment_card = match (row.card_brand, row.card_last4) {
            (Some(brand), Some(last4)) => Some(CardDetails { brand, last4 }),
            _ => None,
        };
        Ok(Order {
            id: row.id,
            event_id: row.event_id,
            organization_id: row.organization_id,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            subtotal: row.subtotal,
            booking_fee: row.booking_fee,
            tax_total: row.tax_total,
            total: row.total,
            currency: row.currency,
            status: parse_order_status(&row.status)?,
            provider_session_id: row.provider_session_id,
            idempotency_key: row.idempotency_key,
            payment_card,
            group_id: row.group_id,
            allocation_id: row.allocation_id,
            test_mode: row.test_mode,
            free_event: row.free_event,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = CoreError;

    fn try_from(row: OrderItemRow) -> CoreResult<Self> {
        Ok(OrderItem {
            id: row.id,
            order_id: row.order_id,
            kind: parse_item_kind(&row.kind)?,
            product_id: row.product_id,
            name: row.name,
            quantity: row.quantity,
            unit_price: row.unit_price,
            list_price: row.list_price,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CoreError;

    fn try_from(row: TicketRow) -> CoreResult<Self> {
        Ok(Ticket {
            id: row.id,
            order_id: row.order_id,
            order_item_id: row.order_item_id,
            seq: row.seq,
            code: row.code,
            status: parse_ticket_status(&row.status)?,
            checked_in: row.checked_in,
            created_at: row.created_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, event_id, organization_id, customer_name, customer_email, \
     subtotal, booking_fee, tax_total, total, currency, status, provider_session_id, \
     idempotency_key, card_brand, card_last4, group_id, allocation_id, test_mode, free_event, \
     created_at, updated_at";

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(Order::try_from).transpose()
    }

    async fn find_by_session(&self, session_id: &str) -> CoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE provider_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(Order::try_from).transpose()
    }

    async fn get_items(&self, order_id: Uuid) -> CoreResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, kind, product_id, name, quantity, unit_price, list_price, \
             created_at FROM order_items WHERE order_id = $1 ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn try_complete(&self, order_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'completed', updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_fail(&self, order_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'failed', updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_payment_details(
        &self,
        order_id: Uuid,
        card: Option<&CardDetails>,
        breakdown: Option<&TaxBreakdown>,
    ) -> CoreResult<()> {
        let breakdown_json = breakdown
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query(
            "UPDATE orders SET card_brand = $1, card_last4 = $2, \
             tax_breakdown = COALESCE($3, tax_breakdown), updated_at = NOW() WHERE id = $4",
        )
        .bind(card.map(|c| c.brand.clone()))
        .bind(card.map(|c| c.last4.clone()))
        .bind(breakdown_json)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn tickets_for_item(&self, order_item_id: Uuid) -> CoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(
            "SELECT id, order_id, order_item_id, seq, code, status, checked_in, created_at \
             FROM tickets WHERE order_item_id = $1 ORDER BY seq",
        )
        .bind(order_item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn insert_tickets(&self, tickets: &[Ticket]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for ticket in tickets {
            sqlx::query(
                "INSERT INTO tickets (id, order_id, order_item_id, seq, code, status, checked_in, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(ticket.id)
            .bind(ticket.order_id)
            .bind(ticket.order_item_id)
            .bind(ticket.seq)
            .bind(&ticket.code)
            .bind(ticket_status_str(ticket.status))
            .bind(ticket.checked_in)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE orders SET status = 'failed', updated_at = NOW() \
             WHERE status = 'pending' AND created_at < $1 RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

impl PgOrderRepository {
    /// Attach the provider session reference once a session exists.
    pub async fn set_session(&self, order_id: Uuid, session_id: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE orders SET provider_session_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(session_id)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}
