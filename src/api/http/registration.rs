use axum::{Json, extract::State};

use crate::{
    app::state::AppState,
    dto::registration::{RegisterOrgRequest, RegisterOrgResponse},
    error::AppError,
    usecases::registration::RegistrationService,
};

/// Registers an organization with the identity provider and invites its admin.
pub async fn register_org_handle(
    State(state): State<AppState>,
    Json(req): Json<RegisterOrgRequest>,
) -> Result<Json<RegisterOrgResponse>, AppError> {
    let response = RegistrationService::register_org(&state.idp, req).await?;

    Ok(Json(response))
}
