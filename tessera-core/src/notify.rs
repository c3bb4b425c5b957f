use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TicketPurchased,
    LowInventory,
    InvoiceGenerated,
    InvoiceDue,
    PaymentReceived,
}

/// Fire-and-forget notification collaborator. Failures are logged by the
/// caller and never propagated as fulfillment failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, payload: serde_json::Value) -> CoreResult<()>;
}

/// Receipt/ticket email collaborator. A failure here is caught and logged
/// without failing the fulfillment that triggered it.
#[async_trait]
pub trait ReceiptSender: Send + Sync {
    async fn send_order_receipt(&self, order_id: Uuid) -> CoreResult<()>;
}
