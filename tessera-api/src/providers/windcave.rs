use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tessera_core::payment::{CardDetails, PaymentAdapter, PaymentSession, SessionState};
use tessera_core::{CoreError, CoreResult};
use uuid::Uuid;

/// Windcave hosted-session client. Confirmation arrives via the FPRN
/// callback, which carries only a session id; the caller re-queries the
/// session here for the authoritative state.
pub struct WindcaveAdapter {
    http: reqwest::Client,
    base_url: String,
    username: String,
    api_key: String,
}

impl WindcaveAdapter {
    pub fn new(base_url: String, username: String, api_key: String) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::Provider(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            username,
            api_key,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    #[serde(rename = "type")]
    type_: String,
    amount: String,
    currency: String,
    merchant_reference: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: String,
    state: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    transactions: Vec<Transaction>,
    merchant_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transaction {
    authorised: Option<bool>,
    card: Option<WindcaveCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindcaveCard {
    #[serde(rename = "type")]
    type_: Option<String>,
    card_number2: Option<String>,
}

/// Cents to Windcave's decimal string ("12.34").
fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

fn map_session(body: SessionResponse, fallback_order: Uuid, amount: i64) -> PaymentSession {
    let order_id = body
        .merchant_reference
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or(fallback_order);
    let authorised = body
        .transactions
        .iter()
        .any(|t| t.authorised.unwrap_or(false));
    let state = match body.state.as_str() {
        "complete" if authorised => SessionState::Succeeded,
        "complete" => SessionState::Declined,
        "init" | "started" => SessionState::Pending,
        "cancelled" => SessionState::Canceled,
        _ => SessionState::Failed,
    };
    let card = body
        .transactions
        .iter()
        .find_map(|t| t.card.as_ref())
        .map(|c| CardDetails {
            brand: c.type_.clone().unwrap_or_default(),
            last4: c
                .card_number2
                .as_deref()
                .map(|n| n.chars().rev().take(4).collect::<Vec<_>>())
                .map(|rev| rev.into_iter().rev().collect())
                .unwrap_or_default(),
        });
    let redirect_url = body
        .links
        .into_iter()
        .find(|l| l.rel == "hpp")
        .map(|l| l.href);

    PaymentSession {
        id: body.id,
        order_id,
        amount,
        currency: String::new(),
        state,
        client_secret: None,
        redirect_url,
        card,
        created_at: Utc::now(),
    }
}

async fn read_session(response: reqwest::Response) -> CoreResult<SessionResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::Provider(format!("windcave: HTTP {status} {body}")));
    }
    response
        .json::<SessionResponse>()
        .await
        .map_err(|e| CoreError::Provider(format!("windcave response: {e}")))
}

#[async_trait]
impl PaymentAdapter for WindcaveAdapter {
    async fn create_session(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        _metadata: serde_json::Value,
    ) -> CoreResult<PaymentSession> {
        let request = CreateSessionRequest {
            type_: "purchase".to_string(),
            amount: format_amount(amount),
            currency: currency.to_string(),
            merchant_reference: order_id.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/api/v1/sessions", self.base_url))
            .basic_auth(&self.username, Some(&self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("windcave: {e}")))?;

        let body = read_session(response).await?;
        tracing::info!(order_id = %order_id, session_id = %body.id, "Windcave session created");
        Ok(map_session(body, order_id, amount))
    }

    async fn get_session_status(&self, session_id: &str) -> CoreResult<PaymentSession> {
        let response = self
            .http
            .get(format!("{}/api/v1/sessions/{session_id}", self.base_url))
            .basic_auth(&self.username, Some(&self.api_key))
            .send()
            .await
            .map_err(|e| CoreError::Provider(format!("windcave: {e}")))?;

        let body = read_session(response).await?;
        Ok(map_session(body, Uuid::nil(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_formatting() {
        assert_eq!(format_amount(12_345), "123.45");
        assert_eq!(format_amount(100), "1.00");
        assert_eq!(format_amount(5), "0.05");
    }

    #[test]
    fn test_complete_unauthorised_maps_to_declined() {
        let body = SessionResponse {
            id: "sess_1".into(),
            state: "complete".into(),
            links: vec![],
            transactions: vec![Transaction {
                authorised: Some(false),
                card: None,
            }],
            merchant_reference: None,
        };
        let session = map_session(body, Uuid::nil(), 0);
        assert_eq!(session.state, SessionState::Declined);
    }

    #[test]
    fn test_complete_authorised_maps_to_succeeded() {
        let body = SessionResponse {
            id: "sess_1".into(),
            state: "complete".into(),
            links: vec![],
            transactions: vec![Transaction {
                authorised: Some(true),
                card: Some(WindcaveCard {
                    type_: Some("visa".into()),
                    card_number2: Some("411111......1111".into()),
                }),
            }],
            merchant_reference: None,
        };
        let session = map_session(body, Uuid::nil(), 0);
        assert_eq!(session.state, SessionState::Succeeded);
        assert_eq!(session.card.unwrap().last4, "1111");
    }
}
