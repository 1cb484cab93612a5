use std::env;

use crate::error::AppError;

/// Process-wide configuration, loaded once at startup.
///
/// Required values fail fast with the variable name instead of surfacing as
/// a generic downstream failure on the first request that needs them.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Identity provider
    pub auth0_domain: String,
    pub auth0_m2m_client_id: String,
    pub auth0_m2m_client_secret: String,
    pub auth0_client_id: Option<String>,
    pub auth0_secret: String,
    pub auth0_namespace: String,

    // Payment processor
    pub stripe_secret_key: String,
    pub stripe_publishable_key: Option<String>,
    pub stripe_webhook_secret: String,

    // Routing
    pub app_base_url: String,
    pub root_domain: String,
    pub cookie_domain: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let app_base_url = require("APP_BASE_URL")?;
        let root_domain = env::var("ROOT_DOMAIN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| derive_root_domain(&app_base_url));

        Ok(Self {
            auth0_domain: require("AUTH0_DOMAIN")?,
            auth0_m2m_client_id: require("AUTH0_M2M_CLIENT_ID")?,
            auth0_m2m_client_secret: require("AUTH0_M2M_CLIENT_SECRET")?,
            auth0_client_id: optional("AUTH0_CLIENT_ID"),
            auth0_secret: require("AUTH0_SECRET")?,
            auth0_namespace: optional("AUTH0_NAMESPACE")
                .unwrap_or_else(|| "https://app.photoup.pt".to_string()),
            stripe_secret_key: require("STRIPE_SECRET_KEY")?,
            stripe_publishable_key: optional("STRIPE_PUBLISHABLE_KEY"),
            stripe_webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
            app_base_url,
            root_domain,
            cookie_domain: optional("COOKIE_DOMAIN"),
        })
    }

    /// Auth0 base URL with the protocol guaranteed.
    pub fn auth0_base_url(&self) -> String {
        if self.auth0_domain.starts_with("http") {
            self.auth0_domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.auth0_domain.trim_end_matches('/'))
        }
    }
}

fn require(key: &str) -> Result<String, AppError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Configuration(format!("Missing required env var {}", key)))
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Best-effort root domain from APP_BASE_URL ("https://app.photoup.pt" -> "photoup.pt").
///
/// Falls back to the bare host when it has no subdomain; an unparseable
/// value falls back to the input. Subdomain routing logs and skips when the
/// result does not match the request host, so a bad value cannot crash the
/// middleware.
fn derive_root_domain(base_url: &str) -> String {
    let host = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split(['/', ':']).next().unwrap_or(host);

    match host.split_once('.') {
        Some((_, rest)) if rest.contains('.') => rest.to_string(),
        _ => host.to_string(),
    }
}
