use axum::{Extension, Json, extract::State};

use crate::{
    app::state::AppState,
    auth::{
        gates::{plan_gate, role_gate},
        session::SessionClaims,
    },
    dto::entitlements::EntitlementsResponse,
    error::AppError,
    models::{departments::PlanTier, users::Role},
    repositories::departments as department_repo,
    usecases::user_sync::UserSyncService,
};

/// Returns the signed-in user's role, plan and gate outcomes.
///
/// Also the user-sync entry point: the upsert keyed by subject id runs here
/// on first authenticated request.
pub async fn get_entitlements_handle(
    State(state): State<AppState>,
    session: Option<Extension<SessionClaims>>,
) -> Result<Json<EntitlementsResponse>, AppError> {
    let Some(Extension(claims)) = session else {
        return Err(AppError::Unauthorized("Authentication required".to_string()));
    };

    let user = UserSyncService::sync_session_user(&state.db, &claims).await?;
    let department = department_repo::find_department_by_id(&state.db, user.department_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Department not found".to_string()))?;

    // Claims can grant a higher role than the stored default; take the max.
    let role = match claims.role(&state.config.auth0_namespace) {
        Some(claim_role) if claim_role.level() > user.role.level() => claim_role,
        _ => user.role,
    };

    Ok(Json(EntitlementsResponse {
        role,
        plan: department.plan,
        sub_status: department.sub_status,
        can_manage_billing: role_gate(&[Role::Admin], Some(role)),
        can_manage_members: role_gate(&[Role::Admin, Role::Operator], Some(role)),
        advanced_reports: plan_gate(PlanTier::IndustrialPro, Some(department.plan), Some(role)),
    }))
}
