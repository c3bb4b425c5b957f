use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    RequiresAction,
    Succeeded,
    Declined,
    Canceled,
    Failed,
}

impl SessionState {
    /// Non-success states that should keep the order pending until the
    /// retry window closes, rather than failing it outright.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Pending | Self::RequiresAction | Self::Declined)
    }
}

/// A provider-side payment session or intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Provider's id (e.g. `pi_123`, or a Windcave session id).
    pub id: String,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub state: SessionState,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
    pub card: Option<CardDetails>,
    pub created_at: DateTime<Utc>,
}

/// Payment method metadata persisted onto the order at fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub brand: String,
    pub last4: String,
}

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Create a payment session/intent with the provider.
    async fn create_session(
        &self,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        metadata: serde_json::Value,
    ) -> CoreResult<PaymentSession>;

    /// Query the provider for the current session state. Used by both the
    /// synchronous capture path and the FPRN fail-safe poll.
    async fn get_session_status(&self, session_id: &str) -> CoreResult<PaymentSession>;
}

/// How the provider is authenticated for a given organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ProviderCredentials {
    /// Platform account key, charges routed to the connected org.
    Connect { secret_key: String },
    /// The organization's own provider account.
    Direct { secret_key: String },
}

impl ProviderCredentials {
    pub fn secret_key(&self) -> &str {
        match self {
            Self::Connect { secret_key } | Self::Direct { secret_key } => secret_key,
        }
    }
}

/// Select provider credentials. Prefers the platform key (Connect mode) and
/// falls back to the organization's own key, as an explicit decision rather
/// than try/catch fallthrough.
pub fn select_credentials(
    platform_key: Option<&str>,
    organization_key: Option<&str>,
) -> CoreResult<ProviderCredentials> {
    match (platform_key, organization_key) {
        (Some(key), _) if !key.is_empty() => Ok(ProviderCredentials::Connect {
            secret_key: key.to_string(),
        }),
        (_, Some(key)) if !key.is_empty() => Ok(ProviderCredentials::Direct {
            secret_key: key.to_string(),
        }),
        _ => Err(CoreError::Validation(
            "no payment provider credentials configured".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_selection_prefers_platform() {
        let creds = select_credentials(Some("sk_platform"), Some("sk_org")).unwrap();
        assert_eq!(
            creds,
            ProviderCredentials::Connect {
                secret_key: "sk_platform".to_string()
            }
        );
    }

    #[test]
    fn test_credential_selection_falls_back_to_org() {
        let creds = select_credentials(None, Some("sk_org")).unwrap();
        assert_eq!(
            creds,
            ProviderCredentials::Direct {
                secret_key: "sk_org".to_string()
            }
        );
        // empty platform key is treated as absent
        let creds = select_credentials(Some(""), Some("sk_org")).unwrap();
        assert!(matches!(creds, ProviderCredentials::Direct { .. }));
    }

    #[test]
    fn test_credential_selection_requires_a_key() {
        assert!(select_credentials(None, None).is_err());
    }

    #[test]
    fn test_secret_key_accessor() {
        let creds = select_credentials(Some("sk_platform"), None).unwrap();
        assert_eq!(creds.secret_key(), "sk_platform");
    }

    #[test]
    fn test_retriable_states() {
        assert!(SessionState::Declined.is_retriable());
        assert!(SessionState::RequiresAction.is_retriable());
        assert!(!SessionState::Succeeded.is_retriable());
        assert!(!SessionState::Failed.is_retriable());
    }
}
