use std::time::Duration;

use async_trait::async_trait;
use tessera_core::notify::{NotificationKind, Notifier, ReceiptSender};
use tessera_core::{CoreError, CoreResult};
use uuid::Uuid;

/// Posts notifications to the internal fan-out service. With no endpoint
/// configured (tests, local dev) every call is a logged no-op.
pub struct HttpNotifier {
    http: reqwest::Client,
    notify_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(notify_url: Option<String>) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Integration {
                step: "notify",
                detail: e.to_string(),
            })?;
        Ok(Self { http, notify_url })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, kind: NotificationKind, payload: serde_json::Value) -> CoreResult<()> {
        let Some(url) = &self.notify_url else {
            tracing::debug!(?kind, "Notification endpoint not configured, dropping");
            return Ok(());
        };

        let body = serde_json::json!({
            "kind": kind,
            "payload": payload,
        });
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Integration {
                step: "notify",
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CoreError::Integration {
                step: "notify",
                detail: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Triggers the transactional receipt email for a completed order.
pub struct HttpReceiptSender {
    http: reqwest::Client,
    receipts_url: Option<String>,
}

impl HttpReceiptSender {
    pub fn new(receipts_url: Option<String>) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Integration {
                step: "email",
                detail: e.to_string(),
            })?;
        Ok(Self { http, receipts_url })
    }
}

#[async_trait]
impl ReceiptSender for HttpReceiptSender {
    async fn send_order_receipt(&self, order_id: Uuid) -> CoreResult<()> {
        let Some(url) = &self.receipts_url else {
            tracing::debug!(order_id = %order_id, "Receipt endpoint not configured, dropping");
            return Ok(());
        };

        let body = serde_json::json!({ "order_id": order_id });
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Integration {
                step: "email",
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CoreError::Integration {
                step: "email",
                detail: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}
