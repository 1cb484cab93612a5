use sqlx::{Postgres, Transaction};

use crate::{dto::checkout::AddressInput, error::AppError, models::addresses::Address};

/// Inserts an address inside the provisioning transaction.
pub async fn create_address(
    tx: &mut Transaction<'_, Postgres>,
    input: &AddressInput,
    nif: Option<&str>,
) -> Result<Address, AppError> {
    let address = sqlx::query_as(
        r#"
            INSERT INTO core.address (
                street,
                city,
                zip_code,
                country,
                nif
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
        "#,
    )
    .bind(input.street.trim())
    .bind(input.city.trim())
    .bind(input.zip_code.trim())
    .bind(input.country.trim())
    .bind(nif)
    .fetch_one(&mut **tx)
    .await?;

    Ok(address)
}
