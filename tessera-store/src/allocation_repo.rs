use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tessera_core::{CoreError, CoreResult};
use tessera_ledger::models::{GroupTicketAllocation, GroupTicketSale, SalePaymentStatus};
use tessera_ledger::repository::AllocationRepository;
use uuid::Uuid;

use crate::storage_err;

pub struct PgAllocationRepository {
    pool: PgPool,
}

impl PgAllocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: Uuid,
    event_id: Uuid,
    ticket_type_id: Uuid,
    group_id: Uuid,
    allocated_quantity: i32,
    used_quantity: i32,
    reserved_quantity: i32,
    full_price: i64,
    minimum_price: i64,
    low_stock_notified_remaining: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SaleRow {
    id: Uuid,
    allocation_id: Uuid,
    order_id: Uuid,
    ticket_id: Uuid,
    full_price: i64,
    paid_price: i64,
    payment_status: String,
    invoice_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

fn parse_payment_status(s: &str) -> CoreResult<SalePaymentStatus> {
    match s {
        "paid" => Ok(SalePaymentStatus::Paid),
        "refunded" => Ok(SalePaymentStatus::Refunded),
        other => Err(CoreError::Storage(format!(
            "unknown sale payment status: {other}"
        ))),
    }
}

impl From<AllocationRow> for GroupTicketAllocation {
    fn from(row: AllocationRow) -> Self {
        GroupTicketAllocation {
            id: row.id,
            event_id: row.event_id,
            ticket_type_id: row.ticket_type_id,
            group_id: row.group_id,
            allocated_quantity: row.allocated_quantity,
            used_quantity: row.used_quantity,
            reserved_quantity: row.reserved_quantity,
            full_price: row.full_price,
            minimum_price: row.minimum_price,
            low_stock_notified_remaining: row.low_stock_notified_remaining,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<SaleRow> for GroupTicketSale {
    type Error = CoreError;

    fn try_from(row: SaleRow) -> CoreResult<Self> {
        Ok(GroupTicketSale {
            id: row.id,
            allocation_id: row.allocation_id,
            order_id: row.order_id,
            ticket_id: row.ticket_id,
            full_price: row.full_price,
            paid_price: row.paid_price,
            payment_status: parse_payment_status(&row.payment_status)?,
            invoice_id: row.invoice_id,
            created_at: row.created_at,
        })
    }
}

const ALLOCATION_COLUMNS: &str = "id, event_id, ticket_type_id, group_id, allocated_quantity, \
     used_quantity, reserved_quantity, full_price, minimum_price, low_stock_notified_remaining, \
     created_at, updated_at";

pub(crate) async fn log_activity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    group_id: Uuid,
    allocation_id: Option<Uuid>,
    kind: &str,
    detail: serde_json::Value,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO group_activity_log (group_id, allocation_id, kind, detail) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(group_id)
    .bind(allocation_id)
    .bind(kind)
    .bind(detail)
    .execute(&mut **tx)
    .await
    .map_err(storage_err)?;
    Ok(())
}

#[async_trait]
impl AllocationRepository for PgAllocationRepository {
    async fn get_allocation(&self, id: Uuid) -> CoreResult<Option<GroupTicketAllocation>> {
        let row = sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM group_ticket_allocations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(GroupTicketAllocation::from))
    }

    async fn try_record_sale(
        &self,
        sale: &GroupTicketSale,
    ) -> CoreResult<Option<GroupTicketAllocation>> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // The guard is in the WHERE clause: the increment only lands while
        // capacity remains, so concurrent sales cannot overbook.
        let updated = sqlx::query_as::<_, AllocationRow>(&format!(
            "UPDATE group_ticket_allocations \
             SET used_quantity = used_quantity + 1, updated_at = NOW() \
             WHERE id = $1 AND used_quantity + reserved_quantity < allocated_quantity \
             RETURNING {ALLOCATION_COLUMNS}"
        ))
        .bind(sale.allocation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(row) = updated else {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO group_ticket_sales (id, allocation_id, order_id, ticket_id, \
             full_price, paid_price, payment_status, invoice_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'paid', $7, $8)",
        )
        .bind(sale.id)
        .bind(sale.allocation_id)
        .bind(sale.order_id)
        .bind(sale.ticket_id)
        .bind(sale.full_price)
        .bind(sale.paid_price)
        .bind(sale.invoice_id)
        .bind(sale.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        log_activity(
            &mut tx,
            row.group_id,
            Some(row.id),
            "sale_recorded",
            serde_json::json!({
                "ticket_id": sale.ticket_id,
                "paid_price": sale.paid_price,
                "discount": sale.full_price - sale.paid_price,
            }),
        )
        .await?;

        tx.commit().await.map_err(storage_err)?;
        Ok(Some(row.into()))
    }

    async fn find_sale_by_ticket(&self, ticket_id: Uuid) -> CoreResult<Option<GroupTicketSale>> {
        let row = sqlx::query_as::<_, SaleRow>(
            "SELECT id, allocation_id, order_id, ticket_id, full_price, paid_price, \
             payment_status, invoice_id, created_at \
             FROM group_ticket_sales WHERE ticket_id = $1",
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(GroupTicketSale::try_from).transpose()
    }

    async fn refund_sale(&self, sale_id: Uuid) -> CoreResult<Option<GroupTicketAllocation>> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // Same shape as the sale guard: the status flip only matches while
        // the sale is still paid, so the loser of a refund race sees zero
        // rows and never decrements.
        let refunded: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE group_ticket_sales SET payment_status = 'refunded' \
             WHERE id = $1 AND payment_status = 'paid' RETURNING allocation_id",
        )
        .bind(sale_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some((allocation_id,)) = refunded else {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, AllocationRow>(&format!(
            "UPDATE group_ticket_allocations \
             SET used_quantity = used_quantity - 1, updated_at = NOW() \
             WHERE id = $1 RETURNING {ALLOCATION_COLUMNS}"
        ))
        .bind(allocation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

        log_activity(
            &mut tx,
            row.group_id,
            Some(row.id),
            "sale_refunded",
            serde_json::json!({ "sale_id": sale_id }),
        )
        .await?;

        tx.commit().await.map_err(storage_err)?;
        Ok(Some(row.into()))
    }

    async fn set_low_stock_watermark(
        &self,
        allocation_id: Uuid,
        remaining: Option<i32>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE group_ticket_allocations \
             SET low_stock_notified_remaining = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(remaining)
        .bind(allocation_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}
