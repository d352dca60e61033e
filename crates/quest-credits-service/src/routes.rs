//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, adventures, health, purchases, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Service API key
/// - `POST /v1/accounts` - Open a balance for an account
/// - `GET /v1/accounts/:account_id/balance` - Current balance
/// - `POST /v1/adventures` - Register an adventure
/// - `PUT /v1/adventures/:adventure_id/phase` - Change lifecycle phase
/// - `GET /v1/adventures/:adventure_id/regenerations` - Regeneration usage
/// - `POST /v1/purchases` - Record a pending purchase
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe` - Stripe payment events
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let api_routes = Router::new()
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/:account_id/balance", get(accounts::get_balance))
        .route("/adventures", post(adventures::create_adventure))
        .route("/adventures/:adventure_id/phase", put(adventures::set_phase))
        .route(
            "/adventures/:adventure_id/regenerations",
            get(adventures::get_regenerations),
        )
        .route("/purchases", post(purchases::begin_purchase))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks are not rate limited; Stripe controls delivery
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
