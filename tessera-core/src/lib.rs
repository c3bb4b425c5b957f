pub mod discount;
pub mod money;
pub mod notify;
pub mod payment;
pub mod tax;

pub use discount::{DiscountSource, ResolvedDiscount};
pub use tax::{ChargeAmounts, TaxBreakdown, TaxConfig};

/// Error taxonomy shared across the core. Handlers map these onto HTTP
/// statuses; see `tessera-api`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Payment provider error: {0}")]
    Provider(String),

    /// The operation was already performed; callers treat this as success.
    #[error("Already done: {0}")]
    AlreadyDone(String),

    /// The operation would break an inventory or money invariant.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A best-effort downstream step (email, notification) failed. Never
    /// propagated as a primary-operation failure.
    #[error("Integration failure in {step}: {detail}")]
    Integration { step: &'static str, detail: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
