use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tessera_core::payment::SessionState;
use tessera_core::CoreResult;
use tessera_order::models::Order;
use tessera_order::repository::OrderRepository;
use tessera_order::PaymentConfirmation;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StripeWebhook {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Deserialize)]
pub struct WebhookObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl WebhookObject {
    fn metadata_uuid(&self, key: &str) -> Option<Uuid> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Webhook handlers acknowledge no matter what happened internally: a 5xx
/// would only trigger provider retry storms, and redelivery against the
/// idempotent orchestrator converges on its own.
fn ack<E: std::fmt::Display>(context: &'static str, result: Result<(), E>) -> StatusCode {
    if let Err(err) = result {
        tracing::error!(error = %err, "{} failed; acknowledged for redelivery", context);
    }
    StatusCode::OK
}

/// POST /v1/webhooks/stripe
/// Payment status updates pushed by Stripe. Always answers 200, both for
/// events we don't handle and for internal failures.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    Json(payload): Json<StripeWebhook>,
) -> StatusCode {
    tracing::info!(
        event_id = %payload.id,
        event_type = %payload.type_,
        object_id = %payload.data.object.id,
        "Received Stripe webhook"
    );

    match payload.type_.as_str() {
        "payment_intent.succeeded" | "payment_intent.payment_failed" | "payment_intent.canceled" => {
            handle_payment_intent(&state, &payload).await
        }
        "checkout.session.completed" => handle_invoice_checkout(&state, &payload).await,
        _ => StatusCode::OK,
    }
}

/// The order is found by session first; metadata is the fallback for
/// intents created before the session reference was persisted.
async fn lookup_order(state: &AppState, object: &WebhookObject) -> CoreResult<Option<Order>> {
    if let Some(order) = state.orders.find_by_session(&object.id).await? {
        return Ok(Some(order));
    }
    match object.metadata_uuid("order_id") {
        Some(order_id) => state.orders.get_order(order_id).await,
        None => Ok(None),
    }
}

async fn handle_payment_intent(state: &AppState, payload: &StripeWebhook) -> StatusCode {
    let object = &payload.data.object;

    let order = match lookup_order(state, object).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            tracing::warn!(intent_id = %object.id, "Webhook intent has no known order");
            return StatusCode::OK;
        }
        Err(err) => return ack("webhook order lookup", Err::<(), _>(err)),
    };

    let session_state = match payload.type_.as_str() {
        "payment_intent.succeeded" => SessionState::Succeeded,
        "payment_intent.canceled" => SessionState::Canceled,
        _ => SessionState::Declined,
    };
    let confirmation = PaymentConfirmation {
        session_id: object.id.clone(),
        state: session_state,
        card: None,
        breakdown: None,
    };

    ack(
        "webhook fulfillment",
        state
            .orchestrator
            .process_confirmation(order.id, confirmation)
            .await
            .map(|_| ()),
    )
}

async fn handle_invoice_checkout(state: &AppState, payload: &StripeWebhook) -> StatusCode {
    let object = &payload.data.object;
    let Some(invoice_id) = object.metadata_uuid("invoice_id") else {
        // Not an invoice checkout; some other flow's session.
        return StatusCode::OK;
    };
    let Some(amount) = object.amount_total.filter(|a| *a > 0) else {
        tracing::warn!(session_id = %object.id, "Invoice checkout without a positive amount");
        return StatusCode::OK;
    };

    ack(
        "invoice payment application",
        state
            .invoices
            .apply_payment(invoice_id, &object.id, amount)
            .await
            .map(|_| ()),
    )
}

#[derive(Debug, Deserialize)]
pub struct FprnQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// GET /v1/webhooks/windcave/fprn?sessionId=...
/// Windcave's fail-proof result notification. The session id is the only
/// payload; state comes from re-querying the session. Always answers 200
/// so Windcave does not retry storms on our own errors.
pub async fn handle_windcave_fprn(
    State(state): State<AppState>,
    Query(query): Query<FprnQuery>,
) -> StatusCode {
    match state
        .orchestrator
        .process_session_poll(state.windcave.as_ref(), &query.session_id)
        .await
    {
        Ok(outcome) => {
            tracing::info!(session_id = %query.session_id, ?outcome, "FPRN processed");
        }
        Err(err) => {
            tracing::error!(session_id = %query.session_id, error = %err, "FPRN processing failed");
        }
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::CoreError;

    #[test]
    fn test_internal_failures_are_acknowledged() {
        let failed: Result<(), CoreError> = Err(CoreError::Storage("connection reset".into()));
        assert_eq!(ack("webhook fulfillment", failed), StatusCode::OK);
        assert_eq!(ack("webhook fulfillment", Ok::<(), CoreError>(())), StatusCode::OK);
    }

    #[test]
    fn test_stripe_webhook_parsing() {
        let raw = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": "pi_123",
                    "status": "succeeded",
                    "metadata": { "order_id": "7f8a1a60-0000-0000-0000-000000000001" }
                }
            }
        });
        let webhook: StripeWebhook = serde_json::from_value(raw).unwrap();
        assert_eq!(webhook.type_, "payment_intent.succeeded");
        assert!(webhook.data.object.metadata_uuid("order_id").is_some());
        assert!(webhook.data.object.metadata_uuid("invoice_id").is_none());
    }

    #[test]
    fn test_checkout_session_amount_parsing() {
        let raw = serde_json::json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_456",
                    "amount_total": 6000,
                    "metadata": { "invoice_id": "7f8a1a60-0000-0000-0000-000000000002" }
                }
            }
        });
        let webhook: StripeWebhook = serde_json::from_value(raw).unwrap();
        assert_eq!(webhook.data.object.amount_total, Some(6000));
        assert!(webhook.data.object.metadata_uuid("invoice_id").is_some());
    }
}
