use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tessera_core::payment::{CardDetails, PaymentAdapter, PaymentSession, SessionState};
use tessera_core::{CoreError, CoreResult};
use uuid::Uuid;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Stripe PaymentIntents client. Amounts are in cents throughout, matching
/// Stripe's smallest-unit convention.
pub struct StripeAdapter {
    http: reqwest::Client,
    secret_key: String,
}

impl StripeAdapter {
    pub fn new(secret_key: String) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::Provider(e.to_string()))?;
        Ok(Self { http, secret_key })
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    client_secret: Option<String>,
    metadata: Option<serde_json::Value>,
    latest_charge: Option<Charge>,
}

#[derive(Debug, Deserialize)]
struct Charge {
    payment_method_details: Option<PaymentMethodDetails>,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodDetails {
    card: Option<CardInfo>,
}

#[derive(Debug, Deserialize)]
struct CardInfo {
    brand: String,
    last4: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

fn map_state(status: &str) -> SessionState {
    match status {
        "succeeded" => SessionState::Succeeded,
        "requires_action" | "requires_confirmation" => SessionState::RequiresAction,
        "requires_payment_method" | "processing" | "requires_capture" => SessionState::Pending,
        "canceled" => SessionState::Canceled,
        _ => SessionState::Failed,
    }
}

fn intent_to_session(intent: PaymentIntent, fallback_order: Uuid) -> PaymentSession {
    let order_id = intent
        .metadata
        .as_ref()
        .and_then(|m| m.get("order_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or(fallback_order);
    let card = intent
        .latest_charge
        .and_then(|c| c.payment_method_details)
        .and_then(|d| d.card)
        .map(|c| CardDetails {
            brand: c.brand,
            last4: c.last4,
        });
    PaymentSession {
        id: intent.id,
        order_id,
        amount: intent.amount,
        currency: intent.currency,
        state: map_state(&intent.status),
        client_secret: intent.client_secret,
        redirect_url: None,
        card,
        created_at: Utc::now(),
    }
}

async fn read_intent(response: reqwest::Response) -> CoreResult<PaymentIntent> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<StripeErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(CoreError::Provider(format!("stripe: {message}")));
    }
    response
        .json::<PaymentIntent>()
        .await
        .map_err(|e| CoreError::Provider(format!("stripe response: {e}")))
}

#[async_trait]
impl PaymentAdapter for StripeAdapter {
    async fn create_session(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        metadata: serde_json::Value,
    ) -> CoreResult<PaymentSession> {
        let mut form = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            ("metadata[order_id]".to_string(), order_id.to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(map) = metadata.as_object() {
            for (key, value) in map {
                if let Some(value) = value.as_str() {
                    form.push((format!("metadata[{key}]"), value.to_string()));
                }
            }
        }

        let response = self
            .http
            .post(format!("{API_BASE}/payment_intents"))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("stripe: {e}")))?;

        let intent = read_intent(response).await?;
        tracing::info!(order_id = %order_id, intent_id = %intent.id, "Stripe payment intent created");
        Ok(intent_to_session(intent, order_id))
    }

    async fn get_session_status(&self, session_id: &str) -> CoreResult<PaymentSession> {
        let response = self
            .http
            .get(format!("{API_BASE}/payment_intents/{session_id}"))
            .query(&[("expand[]", "latest_charge")])
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("stripe: {e}")))?;

        let intent = read_intent(response).await?;
        Ok(intent_to_session(intent, Uuid::nil()))
    }
}
