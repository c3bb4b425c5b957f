pub mod allocation_repo;
pub mod app_config;
pub mod billing_repo;
pub mod database;
pub mod order_repo;

pub use allocation_repo::PgAllocationRepository;
pub use app_config::Config;
pub use billing_repo::PgBillingRepository;
pub use database::DbClient;
pub use order_repo::PgOrderRepository;

/// Map a driver error onto the shared storage variant. Constraint
/// violations that carry meaning (duplicate usage, overbooking) are
/// handled by the individual queries before reaching this.
pub(crate) fn storage_err(err: sqlx::Error) -> tessera_core::CoreError {
    tessera_core::CoreError::Storage(err.to_string())
}
