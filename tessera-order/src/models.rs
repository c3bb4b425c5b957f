use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::payment::CardDetails;
use uuid::Uuid;

/// Order status in the lifecycle. `Completed` and `Failed` are terminal;
/// refunds are a status transition, never a delete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    TicketType,
    Merchandise,
    Donation,
}

/// One checkout transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub organization_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub subtotal: i64,
    pub booking_fee: i64,
    pub tax_total: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    /// Provider session/intent reference once a session exists.
    pub provider_session_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub payment_card: Option<CardDetails>,
    /// Group-sale context, set when the checkout drew from an allocation.
    pub group_id: Option<Uuid>,
    pub allocation_id: Option<Uuid>,
    pub test_mode: bool,
    pub free_event: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A donation-only order carries no ticket or merchandise items.
    pub fn is_donation_only(items: &[OrderItem]) -> bool {
        !items.is_empty() && items.iter().all(|i| i.kind == ItemKind::Donation)
    }
}

/// Line item of an order. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub kind: ItemKind,
    /// Ticket type or merchandise SKU reference.
    pub product_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    /// What the customer pays per unit, in cents.
    pub unit_price: i64,
    /// The product's list price at checkout time, in cents. Discount basis
    /// for group-sale accounting.
    pub list_price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Valid,
    Used,
    Refunded,
}

/// One admission credential, created at fulfillment time, one per unit
/// quantity of a ticket-type order item. `seq` is the unit's position
/// within its item; the store keeps `(order_item_id, seq)` unique so a
/// concurrent double-fulfillment cannot mint extra tickets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub seq: i32,
    pub code: String,
    pub status: TicketStatus,
    pub checked_in: bool,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(order_id: Uuid, order_item_id: Uuid, seq: i32) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            order_id,
            order_item_id,
            seq,
            code: Self::generate_code(&id),
            status: TicketStatus::Valid,
            checked_in: false,
            created_at: Utc::now(),
        }
    }

    /// Format: TSR-{timestamp}-{short_uuid}
    fn generate_code(id: &Uuid) -> String {
        let timestamp = Utc::now().timestamp();
        let short = &id.simple().to_string()[..8];
        format!("TSR-{}-{}", timestamp, short.to_uppercase())
    }
}
