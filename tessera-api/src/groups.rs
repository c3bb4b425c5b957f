use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tessera_ledger::{RefundOutcome, SaleRequest};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecordSaleRequest {
    pub allocation_id: Uuid,
    pub order_id: Uuid,
    pub ticket_id: Uuid,
    /// Live list price of the ticket type, in cents. Discount basis.
    pub list_price: i64,
    pub paid_price: i64,
}

#[derive(Debug, Serialize)]
pub struct RecordSaleResponse {
    pub sale_id: Uuid,
    pub discount: i64,
    pub remaining: i32,
}

/// POST /v1/groups/sales
/// Record one ticket sold against a group allocation.
pub async fn record_sale(
    State(state): State<AppState>,
    Json(payload): Json<RecordSaleRequest>,
) -> Result<Json<RecordSaleResponse>, AppError> {
    let outcome = state
        .ledger
        .record_sale(SaleRequest {
            allocation_id: payload.allocation_id,
            order_id: payload.order_id,
            ticket_id: payload.ticket_id,
            list_price: payload.list_price,
            paid_price: payload.paid_price,
        })
        .await?;

    Ok(Json(RecordSaleResponse {
        sale_id: outcome.sale.id,
        discount: outcome.sale.discount(),
        remaining: outcome.remaining,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefundSaleRequest {
    pub ticket_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RefundSaleResponse {
    pub outcome: &'static str,
}

/// POST /v1/groups/refunds
/// Return a refunded ticket's slot to its allocation. Idempotent.
pub async fn refund_sale(
    State(state): State<AppState>,
    Json(payload): Json<RefundSaleRequest>,
) -> Result<Json<RefundSaleResponse>, AppError> {
    let outcome = state.ledger.record_refund(payload.ticket_id).await?;

    let outcome = match outcome {
        RefundOutcome::Refunded => "refunded",
        RefundOutcome::AlreadyRefunded => "already_refunded",
        RefundOutcome::NotApplicable => "not_applicable",
    };
    Ok(Json(RefundSaleResponse { outcome }))
}
