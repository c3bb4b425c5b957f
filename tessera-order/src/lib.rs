pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod tasks;

pub use models::{ItemKind, Order, OrderItem, OrderStatus, Ticket, TicketStatus};
pub use orchestrator::{
    FulfillmentOrchestrator, FulfillmentOutcome, FulfillmentReport, MockPaymentAdapter,
    PaymentConfirmation,
};
pub use repository::OrderRepository;
