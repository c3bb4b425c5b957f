use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod billing;
pub mod error;
pub mod groups;
pub mod notifications;
pub mod payments;
pub mod providers;
pub mod state;
pub mod webhooks;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .route("/v1/payments/capture", post(payments::capture))
        .route("/v1/payments/stripe-success", post(payments::stripe_success))
        .route("/v1/webhooks/stripe", post(webhooks::handle_stripe_webhook))
        .route(
            "/v1/webhooks/windcave/fprn",
            get(webhooks::handle_windcave_fprn),
        )
        .route("/v1/billing/usage", post(billing::track_usage))
        .route("/v1/groups/invoices", post(billing::generate_invoice))
        .route("/v1/groups/sales", post(groups::record_sale))
        .route("/v1/groups/refunds", post(groups::refund_sale))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
