use sqlx::PgPool;
use tracing::info;

use crate::{
    auth::session::SessionClaims,
    error::AppError,
    models::users::User,
    repositories::{departments as department_repo, organizations as org_repo, users as user_repo},
};

pub struct UserSyncService;

impl UserSyncService {
    /// Mirrors the session user into the tenant store.
    ///
    /// Upsert keyed by the identity-provider subject id; the role is left
    /// alone for existing users, so a promotion is not undone by re-login.
    /// Fast path skips the heavier queries once the user is attached.
    pub async fn sync_session_user(
        pool: &PgPool,
        claims: &SessionClaims,
    ) -> Result<User, AppError> {
        let email = claims.email.as_deref().ok_or_else(|| {
            AppError::Unauthorized("Session is missing an email claim".to_string())
        })?;

        if let Some(existing) = user_repo::find_user_by_auth0_id(pool, &claims.sub).await? {
            return Ok(existing);
        }

        let org_id = claims.org_id.as_deref().ok_or_else(|| {
            AppError::Unauthorized("User must belong to an organization".to_string())
        })?;

        let organization = org_repo::find_organization_by_auth0_org_id(pool, org_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No provisioned workspace for organization {}",
                    org_id
                ))
            })?;

        let department = department_repo::first_department_for_organization(pool, organization.id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Organization {} has no provisioned departments",
                    organization.name
                ))
            })?;

        let display_name = claims.name.as_deref().unwrap_or("Unknown");
        let user =
            user_repo::upsert_user(pool, &claims.sub, email, display_name, department.id).await?;
        info!(user_id = %user.id, department_id = %department.id, "session user synced");

        Ok(user)
    }
}
