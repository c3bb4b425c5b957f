use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tessera_billing::models::{
    BillingCustomer, BillingCycle, GroupInvoice, InvoiceLineItem, InvoiceSource, InvoiceStatus,
    UsageRecord,
};
use tessera_billing::repository::{BillingRepository, PaymentApplication};
use tessera_core::{CoreError, CoreResult};
use tessera_ledger::models::GroupTicketSale;
use uuid::Uuid;

use crate::storage_err;

pub struct PgBillingRepository {
    pool: PgPool,
}

impl PgBillingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BillingCustomerRow {
    subject_id: Uuid,
    email: Option<String>,
    has_billing_method: bool,
    billing_interval_days: Option<i64>,
    next_billing_at: Option<DateTime<Utc>>,
    provider_customer_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    id: Uuid,
    order_id: Uuid,
    organization_id: Uuid,
    transaction_amount: i64,
    fee_percentage: f64,
    fee_fixed: i64,
    total_fee: i64,
    billing_period_start: DateTime<Utc>,
    billing_period_end: DateTime<Utc>,
    billed: bool,
    invoice_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    group_id: Uuid,
    source: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    due_date: Option<DateTime<Utc>>,
    total_tickets_sold: i64,
    total_revenue: i64,
    amount_owed: i64,
    amount_paid: i64,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SaleRow {
    id: Uuid,
    allocation_id: Uuid,
    order_id: Uuid,
    ticket_id: Uuid,
    full_price: i64,
    paid_price: i64,
    invoice_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

fn invoice_status_str(status: InvoiceStatus) -> &'static str {
    match status {
        InvoiceStatus::Draft => "draft",
        InvoiceStatus::Sent => "sent",
        InvoiceStatus::Viewed => "viewed",
        InvoiceStatus::Partial => "partial",
        InvoiceStatus::Paid => "paid",
    }
}

fn parse_invoice_status(s: &str) -> CoreResult<InvoiceStatus> {
    match s {
        "draft" => Ok(InvoiceStatus::Draft),
        "sent" => Ok(InvoiceStatus::Sent),
        "viewed" => Ok(InvoiceStatus::Viewed),
        "partial" => Ok(InvoiceStatus::Partial),
        "paid" => Ok(InvoiceStatus::Paid),
        other => Err(CoreError::Storage(format!(
            "unknown invoice status: {other}"
        ))),
    }
}

fn invoice_source_str(source: InvoiceSource) -> &'static str {
    match source {
        InvoiceSource::GroupDiscounts => "group_discounts",
        InvoiceSource::PlatformUsage => "platform_usage",
    }
}

fn parse_invoice_source(s: &str) -> CoreResult<InvoiceSource> {
    match s {
        "group_discounts" => Ok(InvoiceSource::GroupDiscounts),
        "platform_usage" => Ok(InvoiceSource::PlatformUsage),
        other => Err(CoreError::Storage(format!(
            "unknown invoice source: {other}"
        ))),
    }
}

impl From<UsageRow> for UsageRecord {
    fn from(row: UsageRow) -> Self {
        UsageRecord {
            id: row.id,
            order_id: row.order_id,
            organization_id: row.organization_id,
            transaction_amount: row.transaction_amount,
            fee_percentage: row.fee_percentage,
            fee_fixed: row.fee_fixed,
            total_fee: row.total_fee,
            billing_period_start: row.billing_period_start,
            billing_period_end: row.billing_period_end,
            billed: row.billed,
            invoice_id: row.invoice_id,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<InvoiceRow> for GroupInvoice {
    type Error = CoreError;

    fn try_from(row: InvoiceRow) -> CoreResult<Self> {
        Ok(GroupInvoice {
            id: row.id,
            group_id: row.group_id,
            source: parse_invoice_source(&row.source)?,
            period_start: row.period_start,
            period_end: row.period_end,
            due_date: row.due_date,
            total_tickets_sold: row.total_tickets_sold,
            total_revenue: row.total_revenue,
            amount_owed: row.amount_owed,
            amount_paid: row.amount_paid,
            status: parse_invoice_status(&row.status)?,
            created_at: row.created_at,
        })
    }
}

const INVOICE_COLUMNS: &str = "id, group_id, source, period_start, period_end, due_date, \
     total_tickets_sold, total_revenue, amount_owed, amount_paid, status, created_at";

async fn insert_invoice_with_items(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    invoice: &GroupInvoice,
    line_items: &[InvoiceLineItem],
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO group_invoices (id, group_id, source, period_start, period_end, due_date, \
         total_tickets_sold, total_revenue, amount_owed, amount_paid, status, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(invoice.id)
    .bind(invoice.group_id)
    .bind(invoice_source_str(invoice.source))
    .bind(invoice.period_start)
    .bind(invoice.period_end)
    .bind(invoice.due_date)
    .bind(invoice.total_tickets_sold)
    .bind(invoice.total_revenue)
    .bind(invoice.amount_owed)
    .bind(invoice.amount_paid)
    .bind(invoice_status_str(invoice.status))
    .bind(invoice.created_at)
    .execute(&mut **tx)
    .await
    .map_err(storage_err)?;

    for item in line_items {
        sqlx::query(
            "INSERT INTO group_invoice_line_items (id, invoice_id, description, quantity, amount) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.id)
        .bind(invoice.id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.amount)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;
    }

    Ok(())
}

#[async_trait]
impl BillingRepository for PgBillingRepository {
    async fn get_billing_customer(&self, subject_id: Uuid) -> CoreResult<Option<BillingCustomer>> {
        let row = sqlx::query_as::<_, BillingCustomerRow>(
            "SELECT subject_id, email, has_billing_method, billing_interval_days, \
             next_billing_at, provider_customer_id \
             FROM billing_customers WHERE subject_id = $1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|row| {
            let cycle = match (row.billing_interval_days, row.next_billing_at) {
                (Some(interval_days), Some(next_billing_at)) => Some(BillingCycle {
                    interval_days,
                    next_billing_at,
                }),
                _ => None,
            };
            BillingCustomer {
                subject_id: row.subject_id,
                email: row.email,
                has_billing_method: row.has_billing_method,
                cycle,
                provider_customer_id: row.provider_customer_id,
            }
        }))
    }

    async fn insert_usage(&self, record: &UsageRecord) -> CoreResult<bool> {
        // Unique constraint on order_id carries the idempotency; a
        // conflicting insert is a silent no-op reported to the caller.
        let result = sqlx::query(
            "INSERT INTO usage_records (id, order_id, organization_id, transaction_amount, \
             fee_percentage, fee_fixed, total_fee, billing_period_start, billing_period_end, \
             billed, invoice_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(record.id)
        .bind(record.order_id)
        .bind(record.organization_id)
        .bind(record.transaction_amount)
        .bind(record.fee_percentage)
        .bind(record.fee_fixed)
        .bind(record.total_fee)
        .bind(record.billing_period_start)
        .bind(record.billing_period_end)
        .bind(record.billed)
        .bind(record.invoice_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn unbilled_usage(
        &self,
        organization_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> CoreResult<Vec<UsageRecord>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            "SELECT id, order_id, organization_id, transaction_amount, fee_percentage, \
             fee_fixed, total_fee, billing_period_start, billing_period_end, billed, \
             invoice_id, created_at \
             FROM usage_records \
             WHERE organization_id = $1 AND billed = FALSE \
               AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at",
        )
        .bind(organization_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.into_iter().map(UsageRecord::from).collect())
    }

    async fn unbilled_group_sales(
        &self,
        group_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> CoreResult<Vec<GroupTicketSale>> {
        let rows = sqlx::query_as::<_, SaleRow>(
            "SELECT s.id, s.allocation_id, s.order_id, s.ticket_id, s.full_price, \
             s.paid_price, s.invoice_id, s.created_at \
             FROM group_ticket_sales s \
             JOIN group_ticket_allocations a ON a.id = s.allocation_id \
             WHERE a.group_id = $1 AND s.payment_status = 'paid' AND s.invoice_id IS NULL \
               AND s.created_at >= $2 AND s.created_at < $3 \
             ORDER BY s.created_at",
        )
        .bind(group_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|row| GroupTicketSale {
                id: row.id,
                allocation_id: row.allocation_id,
                order_id: row.order_id,
                ticket_id: row.ticket_id,
                full_price: row.full_price,
                paid_price: row.paid_price,
                payment_status: tessera_ledger::models::SalePaymentStatus::Paid,
                invoice_id: row.invoice_id,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn create_group_invoice(
        &self,
        invoice: &GroupInvoice,
        line_items: &[InvoiceLineItem],
        sale_ids: &[Uuid],
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        insert_invoice_with_items(&mut tx, invoice, line_items).await?;

        // Stamp the constituent sales in the same transaction so a re-run
        // cannot bill them twice.
        sqlx::query("UPDATE group_ticket_sales SET invoice_id = $1 WHERE id = ANY($2)")
            .bind(invoice.id)
            .bind(sale_ids)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        crate::allocation_repo::log_activity(
            &mut tx,
            invoice.group_id,
            None,
            "invoice_generated",
            serde_json::json!({
                "invoice_id": invoice.id,
                "amount_owed": invoice.amount_owed,
                "sales": sale_ids.len(),
            }),
        )
        .await?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn create_usage_invoice(
        &self,
        invoice: &GroupInvoice,
        line_items: &[InvoiceLineItem],
        usage_ids: &[Uuid],
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        insert_invoice_with_items(&mut tx, invoice, line_items).await?;

        sqlx::query(
            "UPDATE usage_records SET billed = TRUE, invoice_id = $1 WHERE id = ANY($2)",
        )
        .bind(invoice.id)
        .bind(usage_ids)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> CoreResult<Option<GroupInvoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM group_invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(GroupInvoice::try_from).transpose()
    }

    async fn apply_invoice_payment(
        &self,
        invoice_id: Uuid,
        session_id: &str,
        amount: i64,
    ) -> CoreResult<PaymentApplication> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // Registering the session and incrementing the balance happen in
        // one transaction; a redelivered webhook loses the insert and
        // reads back the unchanged invoice.
        let inserted = sqlx::query(
            "INSERT INTO invoice_payment_sessions (invoice_id, session_id, amount, created_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (invoice_id, session_id) DO NOTHING",
        )
        .bind(invoice_id)
        .bind(session_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        if inserted.rows_affected() == 0 {
            let row = sqlx::query_as::<_, InvoiceRow>(&format!(
                "SELECT {INVOICE_COLUMNS} FROM group_invoices WHERE id = $1"
            ))
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| CoreError::not_found("invoice", invoice_id))?;
            tx.commit().await.map_err(storage_err)?;
            return Ok(PaymentApplication::Duplicate(row.try_into()?));
        }

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "UPDATE group_invoices \
             SET amount_paid = amount_paid + $1, \
                 status = CASE WHEN amount_paid + $1 >= amount_owed \
                               THEN 'paid' ELSE 'partial' END \
             WHERE id = $2 RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(amount)
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?
        .ok_or_else(|| CoreError::not_found("invoice", invoice_id))?;

        tx.commit().await.map_err(storage_err)?;
        Ok(PaymentApplication::Applied(row.try_into()?))
    }
}
