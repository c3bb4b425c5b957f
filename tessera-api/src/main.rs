use std::net::SocketAddr;
use std::sync::Arc;

use tessera_api::notifications::{HttpNotifier, HttpReceiptSender};
use tessera_api::providers::{StripeAdapter, WindcaveAdapter};
use tessera_api::{app, AppState};
use tessera_billing::{InvoiceGenerator, PlatformFeeConfig, UsageTracker};
use tessera_core::payment::select_credentials;
use tessera_ledger::AllocationLedger;
use tessera_order::FulfillmentOrchestrator;
use tessera_store::{DbClient, PgAllocationRepository, PgBillingRepository, PgOrderRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = tessera_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Tessera API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let orders = Arc::new(PgOrderRepository::new(db.pool.clone()));
    let allocations = Arc::new(PgAllocationRepository::new(db.pool.clone()));
    let billing = Arc::new(PgBillingRepository::new(db.pool.clone()));

    let notifier = Arc::new(
        HttpNotifier::new(config.notifications.notify_url.clone())
            .expect("Failed to build notifier"),
    );
    let receipts = Arc::new(
        HttpReceiptSender::new(config.notifications.receipts_url.clone())
            .expect("Failed to build receipt sender"),
    );

    let rules = &config.business_rules;
    let ledger = Arc::new(AllocationLedger::new(allocations.clone(), notifier.clone()));
    let usage = Arc::new(UsageTracker::new(
        billing.clone(),
        PlatformFeeConfig {
            percent: rules.platform_fee_percent,
            fixed_cents: rules.platform_fee_fixed_cents,
        },
    ));
    let invoices = Arc::new(InvoiceGenerator::new(
        billing.clone(),
        notifier.clone(),
        rules.minimum_invoice_charge_cents,
    ));
    let orchestrator = Arc::new(FulfillmentOrchestrator::new(
        orders.clone(),
        ledger.clone(),
        usage.clone(),
        receipts,
        notifier.clone(),
        chrono::Duration::minutes(rules.payment_retry_minutes),
    ));

    let stripe_config = &config.providers.stripe;
    let stripe_credentials = select_credentials(
        stripe_config.platform_secret_key.as_deref(),
        stripe_config.direct_secret_key.as_deref(),
    )
    .expect("No Stripe credentials configured");
    let stripe = Arc::new(
        StripeAdapter::new(stripe_credentials.secret_key().to_string())
            .expect("Failed to build Stripe client"),
    );
    let windcave = Arc::new(
        WindcaveAdapter::new(
            config.providers.windcave.base_url.clone(),
            config.providers.windcave.username.clone(),
            config.providers.windcave.api_key.clone(),
        )
        .expect("Failed to build Windcave client"),
    );

    // Periodic sweep: pending orders past the retry window fail.
    let sweeper = orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            match sweeper.sweep_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "Expired pending orders"),
                Err(err) => tracing::error!(error = %err, "Order expiry sweep failed"),
            }
        }
    });

    let app_state = AppState {
        orders,
        orchestrator,
        ledger,
        usage,
        invoices,
        stripe,
        windcave,
        business_rules: config.business_rules.clone(),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
