pub mod ledger;
pub mod models;
pub mod repository;

pub use ledger::{AllocationLedger, LedgerError, RefundOutcome, SaleOutcome, SaleRequest};
pub use models::{GroupTicketAllocation, GroupTicketSale, SalePaymentStatus};
pub use repository::AllocationRepository;
