use sqlx::{Postgres, Transaction};

use crate::error::AppError;

/// Claims a webhook event id inside the provisioning transaction.
///
/// Returns false when the id was already recorded, which means a replay. The
/// insert and the provisioning writes share one transaction, so a rollback
/// also releases the claim and the sender's retry can succeed later.
pub async fn try_record_event(
    tx: &mut Transaction<'_, Postgres>,
    event_id: &str,
    event_type: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
            INSERT INTO core.webhook_event (id, event_type)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}
