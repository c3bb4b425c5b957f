pub mod invoice;
pub mod models;
pub mod repository;
pub mod usage;

pub use invoice::{InvoiceGenerator, InvoiceOutcome, InvoiceSkip, PaymentOutcome};
pub use models::{
    BillingCustomer, BillingCycle, GroupInvoice, InvoiceLineItem, InvoiceSource, InvoiceStatus,
    UsageRecord,
};
pub use repository::{BillingRepository, PaymentApplication};
pub use usage::{PlatformFeeConfig, SkipReason, UsageFlags, UsageOutcome, UsageTracker};
