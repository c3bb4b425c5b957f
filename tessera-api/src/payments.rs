use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tessera_core::payment::{PaymentAdapter, PaymentSession};
use tessera_core::tax::{ChargeAmounts, TaxBreakdown, TaxConfig};
use tessera_core::CoreError;
use tessera_order::models::{ItemKind, Order, OrderItem};
use tessera_order::repository::OrderRepository;
use tessera_order::{FulfillmentOutcome, PaymentConfirmation};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub order_id: Uuid,
    /// Provider session/intent id, e.g. `pi_...` for Stripe.
    pub session_id: String,
    /// "stripe" (default) or "windcave".
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_provider() -> String {
    "stripe".to_string()
}

#[derive(Debug, Serialize)]
pub struct ConfirmationResponse {
    pub order_id: Uuid,
    pub outcome: &'static str,
}

fn adapter_for<'a>(state: &'a AppState, provider: &str) -> Result<&'a dyn PaymentAdapter, AppError> {
    match provider {
        "stripe" => Ok(state.stripe.as_ref()),
        "windcave" => Ok(state.windcave.as_ref()),
        other => Err(AppError::ValidationError(format!(
            "unknown payment provider: {other}"
        ))),
    }
}

fn outcome_str(outcome: &FulfillmentOutcome) -> &'static str {
    match outcome {
        FulfillmentOutcome::Completed(_) => "completed",
        FulfillmentOutcome::AlreadyCompleted => "already_completed",
        FulfillmentOutcome::StillPending => "pending",
        FulfillmentOutcome::Failed => "failed",
    }
}

/// The final fee breakdown persisted onto the order at fulfillment,
/// computed from the quoted item amounts and the jurisdiction config.
fn breakdown_for(order: &Order, items: &[OrderItem], state: &AppState) -> TaxBreakdown {
    let mut amounts = ChargeAmounts {
        booking_fee: order.booking_fee,
        ..Default::default()
    };
    for item in items {
        let line = item.unit_price * item.quantity as i64;
        match item.kind {
            ItemKind::TicketType => amounts.tickets += line,
            ItemKind::Merchandise => amounts.addons += line,
            ItemKind::Donation => amounts.donations += line,
        }
    }
    let rules = &state.business_rules;
    let config = TaxConfig {
        enabled: rules.tax_rate > 0.0,
        rate: rules.tax_rate,
        inclusive: rules.tax_inclusive,
        country: Some(rules.tax_country.clone()),
    };
    TaxBreakdown::calculate(amounts, &config)
}

/// The provider session names the order it pays for. A caller cannot
/// complete order A with order B's succeeded session, and a session whose
/// amount differs from the order total paid for something else.
fn verify_session_binding(order: &Order, session: &PaymentSession) -> Result<(), AppError> {
    if !session.order_id.is_nil() && session.order_id != order.id {
        return Err(AppError::ValidationError(format!(
            "session {} belongs to order {}, not {}",
            session.id, session.order_id, order.id
        )));
    }
    if session.amount > 0 && session.amount != order.total {
        return Err(AppError::ValidationError(format!(
            "session amount {} does not match order total {}",
            session.amount, order.total
        )));
    }
    Ok(())
}

async fn confirm_session(
    state: &AppState,
    order_id: Uuid,
    session: PaymentSession,
) -> Result<FulfillmentOutcome, AppError> {
    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| CoreError::not_found("order", order_id))?;

    verify_session_binding(&order, &session)?;

    // Link the session to the order if checkout did not already, so
    // webhook delivery can find it by session id later.
    if order.provider_session_id.as_deref() != Some(session.id.as_str()) {
        state.orders.set_session(order.id, &session.id).await?;
    }

    let items = state.orders.get_items(order.id).await?;
    let breakdown = breakdown_for(&order, &items, state);

    let confirmation = PaymentConfirmation {
        session_id: session.id,
        state: session.state,
        card: session.card,
        breakdown: Some(breakdown),
    };
    let outcome = state
        .orchestrator
        .process_confirmation(order.id, confirmation)
        .await?;
    Ok(outcome)
}

/// POST /v1/payments/capture
/// Re-query the provider for the session state and drive the order state
/// machine. The caller's claim about the payment is never trusted; only
/// the provider-reported state completes an order.
pub async fn capture(
    State(state): State<AppState>,
    Json(payload): Json<CaptureRequest>,
) -> Result<Json<ConfirmationResponse>, AppError> {
    if payload.session_id.is_empty() {
        return Err(AppError::ValidationError(
            "session_id must not be empty".to_string(),
        ));
    }

    let adapter = adapter_for(&state, &payload.provider)?;
    let session = adapter.get_session_status(&payload.session_id).await?;
    let outcome = confirm_session(&state, payload.order_id, session).await?;

    Ok(Json(ConfirmationResponse {
        order_id: payload.order_id,
        outcome: outcome_str(&outcome),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StripeSuccessRequest {
    pub order_id: Uuid,
    pub session_id: String,
}

/// POST /v1/payments/stripe-success
/// Synchronous confirmation from the checkout frontend after Stripe
/// reports success client-side. Same verification path as capture,
/// pinned to the Stripe adapter.
pub async fn stripe_success(
    State(state): State<AppState>,
    Json(payload): Json<StripeSuccessRequest>,
) -> Result<Json<ConfirmationResponse>, AppError> {
    let session = state.stripe.get_session_status(&payload.session_id).await?;
    let outcome = confirm_session(&state, payload.order_id, session).await?;

    Ok(Json(ConfirmationResponse {
        order_id: payload.order_id,
        outcome: outcome_str(&outcome),
    }))
}
