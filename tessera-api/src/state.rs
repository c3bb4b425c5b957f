use std::sync::Arc;

use tessera_billing::{InvoiceGenerator, UsageTracker};
use tessera_core::payment::PaymentAdapter;
use tessera_ledger::AllocationLedger;
use tessera_order::FulfillmentOrchestrator;
use tessera_store::app_config::BusinessRules;
use tessera_store::PgOrderRepository;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<PgOrderRepository>,
    pub orchestrator: Arc<FulfillmentOrchestrator>,
    pub ledger: Arc<AllocationLedger>,
    pub usage: Arc<UsageTracker>,
    pub invoices: Arc<InvoiceGenerator>,
    pub stripe: Arc<dyn PaymentAdapter>,
    pub windcave: Arc<dyn PaymentAdapter>,
    pub business_rules: BusinessRules,
}
