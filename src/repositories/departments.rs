use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::departments::{Department, PlanTier, SubscriptionStatus},
};

pub struct NewDepartment<'a> {
    pub organization_id: Uuid,
    pub name: &'a str,
    pub slug: &'a str,
    pub sub_status: SubscriptionStatus,
    pub plan: PlanTier,
    pub stripe_customer_id: &'a str,
    pub stripe_subscription_id: Option<&'a str>,
    pub billing_address_id: Option<Uuid>,
    pub shipping_address_id: Option<Uuid>,
}

/// Inserts a department inside the provisioning transaction.
///
/// The unique index on (stripe_customer_id, stripe_subscription_id) turns a
/// replayed provisioning event into a Conflict here, which the caller treats
/// as already-processed. The slug index can only fire on a concurrent insert,
/// since callers pick a free slug first.
pub async fn create_department(
    tx: &mut Transaction<'_, Postgres>,
    new: NewDepartment<'_>,
) -> Result<Department, AppError> {
    let department = sqlx::query_as(
        r#"
            INSERT INTO core.department (
                organization_id,
                name,
                slug,
                sub_status,
                plan,
                stripe_customer_id,
                stripe_subscription_id,
                billing_address_id,
                shipping_address_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
        "#,
    )
    .bind(new.organization_id)
    .bind(new.name.trim())
    .bind(new.slug)
    .bind(new.sub_status)
    .bind(new.plan)
    .bind(new.stripe_customer_id)
    .bind(new.stripe_subscription_id)
    .bind(new.billing_address_id)
    .bind(new.shipping_address_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_unique_violation)?;

    Ok(department)
}

/// Returns true when any department already uses the slug.
pub async fn department_slug_exists(
    tx: &mut Transaction<'_, Postgres>,
    slug: &str,
) -> Result<bool, AppError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
            SELECT EXISTS(
                SELECT 1
                FROM core.department
                WHERE slug = $1
            )
        "#,
    )
    .bind(slug)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}

/// Returns true when a department was already provisioned for this payment.
pub async fn department_exists_for_payment(
    tx: &mut Transaction<'_, Postgres>,
    stripe_customer_id: &str,
    stripe_subscription_id: Option<&str>,
) -> Result<bool, AppError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
            SELECT EXISTS(
                SELECT 1
                FROM core.department
                WHERE stripe_customer_id = $1
                AND stripe_subscription_id IS NOT DISTINCT FROM $2
            )
        "#,
    )
    .bind(stripe_customer_id)
    .bind(stripe_subscription_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}

/// Returns a department by id.
pub async fn find_department_by_id(
    pool: &PgPool,
    department_id: Uuid,
) -> Result<Option<Department>, AppError> {
    let department = sqlx::query_as(
        r#"
            SELECT *
            FROM core.department
            WHERE id = $1
        "#,
    )
    .bind(department_id)
    .fetch_optional(pool)
    .await?;

    Ok(department)
}

/// Returns the first department of an organization, used to attach new users.
pub async fn first_department_for_organization(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Option<Department>, AppError> {
    let department = sqlx::query_as(
        r#"
            SELECT *
            FROM core.department
            WHERE organization_id = $1
            ORDER BY created_at ASC
            LIMIT 1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await?;

    Ok(department)
}

/// Marks every department on the subscription as past due. Returns rows touched.
pub async fn mark_past_due_by_subscription(
    tx: &mut Transaction<'_, Postgres>,
    stripe_subscription_id: &str,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
            UPDATE core.department
            SET sub_status = $2, updated_at = NOW()
            WHERE stripe_subscription_id = $1
        "#,
    )
    .bind(stripe_subscription_id)
    .bind(SubscriptionStatus::PastDue)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Marks every department on the payment customer as past due. Returns rows touched.
pub async fn mark_past_due_by_customer(
    tx: &mut Transaction<'_, Postgres>,
    stripe_customer_id: &str,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
            UPDATE core.department
            SET sub_status = $2, updated_at = NOW()
            WHERE stripe_customer_id = $1
        "#,
    )
    .bind(stripe_customer_id)
    .bind(SubscriptionStatus::PastDue)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

fn map_unique_violation(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                if db_err.constraint() == Some("department_slug_key") {
                    return AppError::Conflict("Department slug already taken".to_string());
                }
                return AppError::Conflict(
                    "Department already provisioned for this payment".to_string(),
                );
            }
            AppError::Database(err)
        }
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[derive(Debug)]
    struct StubDbError {
        code: &'static str,
        constraint: Option<&'static str>,
        kind: sqlx::error::ErrorKind,
    }

    impl std::fmt::Display for StubDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "constraint violation ({})", self.code)
        }
    }

    impl std::error::Error for StubDbError {}

    impl sqlx::error::DatabaseError for StubDbError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            use sqlx::error::ErrorKind;
            match self.kind {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                ErrorKind::ForeignKeyViolation => ErrorKind::ForeignKeyViolation,
                ErrorKind::NotNullViolation => ErrorKind::NotNullViolation,
                ErrorKind::CheckViolation => ErrorKind::CheckViolation,
                _ => ErrorKind::Other,
            }
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }
    }

    fn database_error(
        code: &'static str,
        constraint: Option<&'static str>,
        kind: sqlx::error::ErrorKind,
    ) -> sqlx::Error {
        sqlx::Error::Database(Box::new(StubDbError {
            code,
            constraint,
            kind,
        }))
    }

    #[test]
    fn payment_key_violation_becomes_conflict() {
        let err = database_error(
            "23505",
            Some("department_payment_key"),
            sqlx::error::ErrorKind::UniqueViolation,
        );
        match map_unique_violation(err) {
            AppError::Conflict(msg) => assert!(msg.contains("already provisioned")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn slug_violation_becomes_conflict() {
        let err = database_error(
            "23505",
            Some("department_slug_key"),
            sqlx::error::ErrorKind::UniqueViolation,
        );
        match map_unique_violation(err) {
            AppError::Conflict(msg) => assert!(msg.contains("slug")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn other_database_errors_pass_through() {
        let err = database_error(
            "23503",
            Some("department_organization_id_fkey"),
            sqlx::error::ErrorKind::ForeignKeyViolation,
        );
        assert!(matches!(map_unique_violation(err), AppError::Database(_)));
    }
}
