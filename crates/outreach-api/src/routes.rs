//! API routes.

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    billing_webhook, check_credits, create_session, extract_profile, find_email,
    generate_message, get_credit_history, get_credits, health, ready, release_hold,
    reset_free_credits,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    ClientRateLimiter,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let credit_routes = Router::new()
        .route("/auth/session", post(create_session))
        .route("/credits", get(get_credits))
        .route("/credits/history", get(get_credit_history))
        .route("/credits/check", post(check_credits))
        .route("/credits/hold", delete(release_hold));

    // Paid operations (hold, call provider, commit)
    let operation_routes = Router::new()
        .route("/profiles/extract", post(extract_profile))
        .route("/messages/generate", post(generate_message))
        .route("/emails/find", post(find_email));

    let rate_limiter = ClientRateLimiter::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    );

    let api_routes = Router::new()
        .merge(credit_routes)
        .merge(operation_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    // Server-to-server, authenticated by shared secret
    let billing_routes = Router::new()
        .route("/webhooks/billing", post(billing_webhook))
        .route("/internal/credits/:uid/reset-free", post(reset_free_credits));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(billing_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
