use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::app::config::AppConfig;
use crate::error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Renew the cached management token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Auth0 Management API client.
///
/// The machine-to-machine token is fetched lazily via client_credentials and
/// cached behind a mutex until shortly before expiry, so concurrent callers
/// never stampede the token endpoint.
#[derive(Clone)]
pub struct Auth0Client {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    /// Application client id used as the inviter reference, when configured.
    app_client_id: Option<String>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

/// Result of an organization create call, distinguishing the 409 path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgCreateOutcome {
    Created { org_id: String },
    AlreadyExists,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct IdpOrganization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
struct CreateOrgRequest<'a> {
    name: &'a str,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct InviteRequest<'a> {
    inviter: InviterRef<'a>,
    invitee: InviteeRef<'a>,
    client_id: &'a str,
    send_invitation_email: bool,
}

#[derive(Debug, Serialize)]
struct InviterRef<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct InviteeRef<'a> {
    email: &'a str,
}

impl Auth0Client {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.auth0_base_url(),
            client_id: config.auth0_m2m_client_id.clone(),
            client_secret: config.auth0_m2m_client_secret.clone(),
            app_client_id: config.auth0_client_id.clone(),
            token: Arc::new(Mutex::new(None)),
        })
    }

    async fn management_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS);
            if token.expires_at - margin > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .json(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                audience: format!("{}/api/v2/", self.base_url),
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Auth0 token request failed: {}", e)))?;

        // A rejected token request means bad credentials, not a flaky call.
        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::Configuration(format!(
                "Auth0 token request returned {}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("Auth0 token response parse failed: {}", e))
        })?;

        let fresh = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        };
        *cached = Some(fresh);

        Ok(token.access_token)
    }

    /// Looks up an organization by slug. 404 means it does not exist.
    pub async fn check_org_exists(&self, slug: &str) -> Result<Option<IdpOrganization>, AppError> {
        let token = self.management_token().await?;
        let response = self
            .http
            .get(format!(
                "{}/api/v2/organizations/name/{}",
                self.base_url,
                urlencoding::encode(slug)
            ))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Auth0 lookup failed: {}", e)))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let org: IdpOrganization = response.json().await.map_err(|e| {
                    AppError::ExternalService(format!("Auth0 lookup parse failed: {}", e))
                })?;
                Ok(Some(org))
            }
            status => Err(AppError::ExternalService(format!(
                "Auth0 lookup returned {}",
                status.as_u16()
            ))),
        }
    }

    /// Creates an organization; a 409 from Auth0 is reported as AlreadyExists
    /// rather than an error so callers can converge on the existing org.
    ///
    /// Metadata lands on the organization record, where the application
    /// reads it back from login claims.
    pub async fn create_org(
        &self,
        slug: &str,
        display_name: &str,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<OrgCreateOutcome, AppError> {
        let token = self.management_token().await?;
        let response = self
            .http
            .post(format!("{}/api/v2/organizations", self.base_url))
            .bearer_auth(&token)
            .json(&CreateOrgRequest {
                name: slug,
                display_name,
                metadata,
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Auth0 org create failed: {}", e)))?;

        match response.status() {
            reqwest::StatusCode::CONFLICT => Ok(OrgCreateOutcome::AlreadyExists),
            status if status.is_success() => {
                let org: IdpOrganization = response.json().await.map_err(|e| {
                    AppError::ExternalService(format!("Auth0 org create parse failed: {}", e))
                })?;
                Ok(OrgCreateOutcome::Created { org_id: org.id })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::ExternalService(format!(
                    "Auth0 org create returned {}: {}",
                    status.as_u16(),
                    body
                )))
            }
        }
    }

    /// Emails an organization invitation to the given admin address.
    ///
    /// Requires the application client id; fails fast when it is not
    /// configured instead of sending a broken invitation.
    pub async fn invite_admin_to_org(&self, org_id: &str, email: &str) -> Result<(), AppError> {
        let Some(app_client_id) = self.app_client_id.as_deref() else {
            return Err(AppError::Configuration(
                "Missing required env var AUTH0_CLIENT_ID".to_string(),
            ));
        };

        let token = self.management_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/api/v2/organizations/{}/invitations",
                self.base_url,
                urlencoding::encode(org_id)
            ))
            .bearer_auth(&token)
            .json(&InviteRequest {
                inviter: InviterRef {
                    name: "System Admin",
                },
                invitee: InviteeRef { email },
                client_id: app_client_id,
                send_invitation_email: true,
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Auth0 invite failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Auth0 invite returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(())
    }
}
