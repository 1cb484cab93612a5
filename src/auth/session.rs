use std::collections::BTreeMap;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, models::users::Role};

pub const SESSION_COOKIE: &str = "appSession";

/// Session claims carried by the signed session cookie.
///
/// Custom claims issued by the identity provider live under a configurable
/// URL namespace; everything not matched by a named field lands in `extra`
/// and is resolved through [`SessionClaims::claim`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SessionClaims {
    /// Resolves a custom claim: namespaced form first, bare name second.
    pub fn claim(&self, namespace: &str, name: &str) -> Option<&serde_json::Value> {
        let namespaced = format!("{}/{}", namespace.trim_end_matches('/'), name);
        self.extra.get(&namespaced).or_else(|| self.extra.get(name))
    }

    /// Organization slug used for tenant routing.
    ///
    /// Fallback chain: namespaced org_name, bare org_name, bare org_slug.
    pub fn org_slug(&self, namespace: &str) -> Option<String> {
        self.claim(namespace, "org_name")
            .or_else(|| self.extra.get("org_slug"))
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .filter(|slug| !slug.is_empty())
    }

    /// Highest role granted by the namespaced roles claim.
    pub fn role(&self, namespace: &str) -> Option<Role> {
        let roles = self.claim(namespace, "roles")?.as_array()?;
        roles
            .iter()
            .filter_map(|value| value.as_str())
            .filter_map(Role::from_claim)
            .max_by_key(|role| role.level())
    }

    /// True when the session references an organization in any known claim.
    pub fn has_organization(&self, namespace: &str) -> bool {
        self.org_id.is_some() || self.org_slug(namespace).is_some()
    }
}

/// Decodes and validates the session cookie value.
pub fn decode_session(token: &str, secret: &str) -> Result<SessionClaims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid session: {}", e)))?;

    Ok(data.claims)
}

/// Extracts the session cookie from a Cookie header value.
pub fn session_cookie_value(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
    })
}
