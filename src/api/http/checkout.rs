use axum::{Json, extract::State};

use crate::{
    app::state::AppState,
    dto::checkout::{CheckoutRequest, EmbeddedCheckoutResponse, HostedCheckoutResponse},
    error::AppError,
    usecases::checkout::CheckoutService,
};

/// Starts a hosted checkout and returns the redirect URL.
pub async fn create_checkout_session_handle(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<HostedCheckoutResponse>, AppError> {
    let response =
        CheckoutService::create_hosted_session(&state.stripe, &state.config, &req).await?;

    Ok(Json(response))
}

/// Starts an embedded checkout and returns the payment-element client secret.
pub async fn create_checkout_intent_handle(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<EmbeddedCheckoutResponse>, AppError> {
    let response = CheckoutService::create_embedded_intent(&state.stripe, &req).await?;

    Ok(Json(response))
}
