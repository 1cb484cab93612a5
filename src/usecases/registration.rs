use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
    dto::registration::{RegisterOrgRequest, RegisterOrgResponse},
    error::AppError,
    services::idp::{Auth0Client, OrgCreateOutcome},
    validation::is_valid_email,
};

pub struct RegistrationService;

/// Derives a URL-safe slug: lowercase, whitespace to hyphens, non-word
/// characters stripped, repeated hyphens collapsed.
pub(crate) fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_hyphen = true;
    for ch in name.trim().to_lowercase().chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !last_was_hyphen {
                slug.push('-');
                last_was_hyphen = true;
            }
        } else if ch.is_alphanumeric() {
            slug.push(ch);
            last_was_hyphen = false;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }

    slug
}

impl RegistrationService {
    /// Registers an organization with the identity provider and invites the
    /// admin. Invitation failure is reported as a warning, not a rollback;
    /// the org exists either way and the invite can be re-sent.
    pub async fn register_org(
        idp: &Auth0Client,
        req: RegisterOrgRequest,
    ) -> Result<RegisterOrgResponse, AppError> {
        let name = req.organization_name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest(
                "organizationName is required".to_string(),
            ));
        }
        if !is_valid_email(&req.admin_email) {
            return Err(AppError::BadRequest(
                "A valid adminEmail is required".to_string(),
            ));
        }
        let plan = req
            .plan
            .as_deref()
            .map(str::trim)
            .filter(|plan| !plan.is_empty())
            .ok_or_else(|| AppError::BadRequest("plan is required".to_string()))?;

        let slug = slugify(name);
        if slug.is_empty() {
            return Err(AppError::BadRequest(
                "organizationName yields an empty slug".to_string(),
            ));
        }

        if idp.check_org_exists(&slug).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Organization slug '{}' already exists",
                slug
            )));
        }

        // The purchased plan rides along as org metadata so login claims
        // carry it back into the app.
        let mut org_metadata = BTreeMap::new();
        org_metadata.insert("plan".to_string(), plan.to_string());

        let org_id = match idp.create_org(&slug, name, Some(&org_metadata)).await? {
            OrgCreateOutcome::Created { org_id } => org_id,
            // Lost the race against a concurrent registration of the same slug.
            OrgCreateOutcome::AlreadyExists => {
                return Err(AppError::Conflict(format!(
                    "Organization slug '{}' already exists",
                    slug
                )));
            }
        };
        info!(%slug, %org_id, "organization registered with identity provider");

        match idp.invite_admin_to_org(&org_id, req.admin_email.trim()).await {
            Ok(()) => Ok(RegisterOrgResponse {
                success: true,
                org_id,
                message: Some(format!("Organization '{}' created", name)),
                warning: None,
            }),
            Err(err) => {
                warn!(%org_id, error = %err, "admin invitation failed after org creation");
                Ok(RegisterOrgResponse {
                    success: true,
                    org_id,
                    message: None,
                    warning: Some(
                        "Organization created, but the admin invitation could not be sent"
                            .to_string(),
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RegistrationService, slugify};
    use crate::{
        app::config::AppConfig,
        dto::registration::RegisterOrgRequest,
        error::AppError,
        services::idp::Auth0Client,
    };

    fn idp() -> Auth0Client {
        let config = AppConfig {
            auth0_domain: "test.eu.auth0.com".to_string(),
            auth0_m2m_client_id: "m2m_client".to_string(),
            auth0_m2m_client_secret: "m2m_secret".to_string(),
            auth0_client_id: Some("app_client".to_string()),
            auth0_secret: "session-secret".to_string(),
            auth0_namespace: "https://app.photoup.pt".to_string(),
            stripe_secret_key: "sk_test_xxx".to_string(),
            stripe_publishable_key: None,
            stripe_webhook_secret: "whsec_test".to_string(),
            app_base_url: "https://app.example.com".to_string(),
            root_domain: "example.com".to_string(),
            cookie_domain: None,
        };
        Auth0Client::new(&config).expect("client")
    }

    fn request(name: &str, email: &str, plan: Option<&str>) -> RegisterOrgRequest {
        RegisterOrgRequest {
            organization_name: name.to_string(),
            admin_email: email.to_string(),
            plan: plan.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn registration_requires_a_plan() {
        let err = RegistrationService::register_org(
            &idp(),
            request("Acme", "rita@acme.pt", None),
        )
        .await
        .expect_err("must be rejected");

        match err {
            AppError::BadRequest(msg) => assert!(msg.contains("plan")),
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn registration_rejects_a_blank_plan() {
        let err = RegistrationService::register_org(
            &idp(),
            request("Acme", "rita@acme.pt", Some("   ")),
        )
        .await
        .expect_err("must be rejected");

        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn registration_rejects_missing_name_and_bad_email() {
        let err = RegistrationService::register_org(
            &idp(),
            request("  ", "rita@acme.pt", Some("starter")),
        )
        .await
        .expect_err("must be rejected");
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = RegistrationService::register_org(
            &idp(),
            request("Acme", "not-an-email", Some("starter")),
        )
        .await
        .expect_err("must be rejected");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("Acme Fotografia"), "acme-fotografia");
        assert_eq!(slugify("  Acme   Corp  "), "acme-corp");
        assert_eq!(slugify("Acme, Lda."), "acme-lda");
        assert_eq!(slugify("ACME---industries"), "acme-industries");
    }

    #[test]
    fn slugify_strips_symbols_and_trailing_hyphens() {
        assert_eq!(slugify("Acme!"), "acme");
        assert_eq!(slugify("A&B Studio "), "ab-studio");
        assert_eq!(slugify("***"), "");
    }
}
