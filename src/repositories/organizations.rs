use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::organizations::{ExternalSyncStatus, Organization},
};

/// Returns the organization referenced by an identity-provider org id.
pub async fn find_organization_by_auth0_org_id(
    pool: &PgPool,
    auth0_org_id: &str,
) -> Result<Option<Organization>, AppError> {
    let organization = sqlx::query_as(
        r#"
            SELECT *
            FROM core.organization
            WHERE auth0_org_id = $1
        "#,
    )
    .bind(auth0_org_id)
    .fetch_optional(pool)
    .await?;

    Ok(organization)
}

/// Returns the organization with the given display name, if any.
pub async fn find_organization_by_name(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<Option<Organization>, AppError> {
    let organization = sqlx::query_as(
        r#"
            SELECT *
            FROM core.organization
            WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(organization)
}

/// Inserts an organization inside the provisioning transaction.
pub async fn create_organization(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    auth0_org_id: Option<&str>,
    external_sync_status: ExternalSyncStatus,
) -> Result<Organization, AppError> {
    let organization = sqlx::query_as(
        r#"
            INSERT INTO core.organization (
                name,
                auth0_org_id,
                external_sync_status
            )
            VALUES ($1, $2, $3)
            RETURNING *
        "#,
    )
    .bind(name.trim())
    .bind(auth0_org_id)
    .bind(external_sync_status)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_unique_violation)?;

    Ok(organization)
}

/// Records the identity-provider org id and sync outcome after the fact.
pub async fn set_external_sync(
    pool: &PgPool,
    organization_id: Uuid,
    auth0_org_id: Option<&str>,
    external_sync_status: ExternalSyncStatus,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
            UPDATE core.organization
            SET
                auth0_org_id = COALESCE($2, auth0_org_id),
                external_sync_status = $3,
                updated_at = NOW()
            WHERE id = $1
        "#,
    )
    .bind(organization_id)
    .bind(auth0_org_id)
    .bind(external_sync_status)
    .execute(pool)
    .await?;

    Ok(())
}

fn map_unique_violation(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Conflict("Organization already exists".to_string());
            }
            AppError::Database(err)
        }
        _ => err.into(),
    }
}
