use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::users::{Role, User},
};

/// Returns the user identified by an identity-provider subject id.
pub async fn find_user_by_auth0_id(
    pool: &PgPool,
    auth0_user_id: &str,
) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as(
        r#"
            SELECT *
            FROM core."user"
            WHERE auth0_user_id = $1
        "#,
    )
    .bind(auth0_user_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

/// Upserts a user keyed by subject id.
///
/// Email, name and department follow the identity provider on every login;
/// the role is only set on first insert, so a manual promotion survives
/// re-login.
pub async fn upsert_user(
    pool: &PgPool,
    auth0_user_id: &str,
    email: &str,
    display_name: &str,
    department_id: Uuid,
) -> Result<User, AppError> {
    let user = sqlx::query_as(
        r#"
            INSERT INTO core."user" (
                auth0_user_id,
                email,
                display_name,
                role,
                department_id
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (auth0_user_id) DO UPDATE
            SET
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                department_id = EXCLUDED.department_id,
                updated_at = NOW()
            RETURNING *
        "#,
    )
    .bind(auth0_user_id)
    .bind(email)
    .bind(display_name)
    .bind(Role::Viewer)
    .bind(department_id)
    .fetch_one(pool)
    .await?;

    Ok(user)
}
