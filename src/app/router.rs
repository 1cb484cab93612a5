use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::{
    api::http::{checkout, entitlements, registration, webhooks},
    app::{middleware::security_headers, state::AppState},
    auth::middleware::session_middleware,
    telemetry,
};

pub fn build_router(state: AppState) -> Router {
    // Webhooks carry no session and must never be redirected.
    let webhook_routes = Router::new().route(
        "/api/webhooks/stripe",
        post(webhooks::stripe_webhook_handle),
    );

    let app_routes = Router::new()
        .route("/api/register-org", post(registration::register_org_handle))
        .route(
            "/api/checkout/session",
            post(checkout::create_checkout_session_handle),
        )
        .route(
            "/api/checkout/intent",
            post(checkout::create_checkout_intent_handle),
        )
        .route(
            "/api/me/entitlements",
            get(entitlements::get_entitlements_handle),
        )
        .route("/", get(|| async { "ok" }))
        .route("/dashboard", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .merge(webhook_routes)
        .merge(app_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(telemetry::request_logging_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
