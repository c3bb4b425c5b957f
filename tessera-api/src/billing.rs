use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_billing::{InvoiceOutcome, InvoiceSkip, UsageFlags, UsageOutcome};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TrackUsageRequest {
    pub order_id: Uuid,
    pub organization_id: Uuid,
    /// Order total in cents.
    pub amount: i64,
    #[serde(flatten)]
    pub flags: UsageFlags,
}

#[derive(Debug, Serialize)]
pub struct TrackUsageResponse {
    pub outcome: String,
    pub total_fee: Option<i64>,
}

/// POST /v1/billing/usage
/// Record the platform fee for a completed order. Safe to call twice.
pub async fn track_usage(
    State(state): State<AppState>,
    Json(payload): Json<TrackUsageRequest>,
) -> Result<Json<TrackUsageResponse>, AppError> {
    let outcome = state
        .usage
        .track(
            payload.order_id,
            payload.organization_id,
            payload.amount,
            payload.flags,
            Utc::now(),
        )
        .await?;

    let response = match outcome {
        UsageOutcome::Recorded(record) => TrackUsageResponse {
            outcome: "recorded".to_string(),
            total_fee: Some(record.total_fee),
        },
        UsageOutcome::AlreadyRecorded => TrackUsageResponse {
            outcome: "already_recorded".to_string(),
            total_fee: None,
        },
        UsageOutcome::Skipped(reason) => TrackUsageResponse {
            outcome: format!("skipped:{}", serde_json::to_value(reason)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default()),
            total_fee: None,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    /// Group for discount invoices, organization for usage invoices.
    pub subject_id: Uuid,
    /// "group_discounts" (default) or "platform_usage".
    #[serde(default = "default_source")]
    pub source: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
}

fn default_source() -> String {
    "group_discounts".to_string()
}

#[derive(Debug, Serialize)]
pub struct GenerateInvoiceResponse {
    pub outcome: String,
    pub invoice_id: Option<Uuid>,
    pub amount_owed: Option<i64>,
}

fn skip_str(skip: InvoiceSkip) -> &'static str {
    match skip {
        InvoiceSkip::NothingToBill => "nothing_to_bill",
        InvoiceSkip::BelowMinimumCharge => "below_minimum_charge",
        InvoiceSkip::NoBillingMethod => "no_billing_method",
    }
}

/// POST /v1/groups/invoices
/// Aggregate a closed period's unbilled records into an invoice.
pub async fn generate_invoice(
    State(state): State<AppState>,
    Json(payload): Json<GenerateInvoiceRequest>,
) -> Result<Json<GenerateInvoiceResponse>, AppError> {
    if payload.period_end <= payload.period_start {
        return Err(AppError::ValidationError(
            "period_end must be after period_start".to_string(),
        ));
    }

    let outcome = match payload.source.as_str() {
        "group_discounts" => {
            state
                .invoices
                .generate_group_invoice(
                    payload.subject_id,
                    payload.period_start,
                    payload.period_end,
                    payload.due_date,
                )
                .await?
        }
        "platform_usage" => {
            state
                .invoices
                .generate_usage_invoice(
                    payload.subject_id,
                    payload.period_start,
                    payload.period_end,
                    payload.due_date,
                )
                .await?
        }
        other => {
            return Err(AppError::ValidationError(format!(
                "unknown invoice source: {other}"
            )))
        }
    };

    let response = match outcome {
        InvoiceOutcome::Generated(invoice) => GenerateInvoiceResponse {
            outcome: "generated".to_string(),
            invoice_id: Some(invoice.id),
            amount_owed: Some(invoice.amount_owed),
        },
        InvoiceOutcome::Skipped(skip) => GenerateInvoiceResponse {
            outcome: format!("skipped:{}", skip_str(skip)),
            invoice_id: None,
            amount_owed: None,
        },
    };
    Ok(Json(response))
}
