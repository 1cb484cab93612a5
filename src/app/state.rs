use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    app::config::AppConfig,
    error::AppError,
    services::{idp::Auth0Client, stripe::StripeClient},
};

/// Shared application state. External clients are constructed once here and
/// injected through the router, never reached as globals.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub stripe: StripeClient,
    pub idp: Auth0Client,
}

impl AppState {
    pub fn new(db: PgPool, config: AppConfig) -> Result<Self, AppError> {
        let stripe = StripeClient::new(
            config.stripe_secret_key.clone(),
            config.stripe_webhook_secret.clone(),
        )?;
        let idp = Auth0Client::new(&config)?;

        Ok(Self {
            db,
            config: Arc::new(config),
            stripe,
            idp,
        })
    }
}
