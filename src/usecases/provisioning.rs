use std::collections::BTreeMap;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        checkout::{DecodedCheckout, decode_metadata},
        webhooks::{InvoiceObject, PaymentIntentObject, SessionObject, StripeEvent, SubscriptionObject},
    },
    error::AppError,
    models::{
        departments::{PlanTier, SubscriptionStatus},
        organizations::ExternalSyncStatus,
    },
    repositories::{
        addresses as address_repo, departments as department_repo,
        organizations as org_repo, webhook_events as event_repo,
    },
    services::idp::{Auth0Client, OrgCreateOutcome},
    usecases::registration::slugify,
};

pub struct ProvisioningService;

/// What a verified webhook event asks the state machine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningDecision {
    /// Materialize tenant records from the intent metadata.
    Provision {
        customer: String,
        subscription: Option<String>,
        metadata: BTreeMap<String, String>,
    },
    /// Flag existing departments as past due.
    MarkPastDue {
        subscription: Option<String>,
        customer: Option<String>,
    },
    Ignore,
}

struct ProvisionedTenant {
    organization_id: Uuid,
    decoded: DecodedCheckout,
}

/// Candidate slug for the given attempt: the base first, numeric suffixes after.
fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// Maps a verified event to a decision. Pure; no I/O.
pub fn decide(event: &StripeEvent) -> Result<ProvisioningDecision, AppError> {
    let object = event.data.object.clone();
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: SessionObject = serde_json::from_value(object)?;
            let paid = matches!(
                session.payment_status.as_deref(),
                Some("paid") | Some("processing")
            );
            let Some(customer) = session.customer else {
                return Ok(ProvisioningDecision::Ignore);
            };
            if !paid {
                return Ok(ProvisioningDecision::Ignore);
            }
            Ok(ProvisioningDecision::Provision {
                customer,
                subscription: session.subscription,
                metadata: session.metadata,
            })
        }
        "customer.subscription.updated" => {
            let subscription: SubscriptionObject = serde_json::from_value(object)?;
            let was_incomplete = event
                .data
                .previous_attributes
                .as_ref()
                .and_then(|prev| prev.get("status"))
                .and_then(|status| status.as_str())
                == Some("incomplete");
            if !(was_incomplete && subscription.status == "active") {
                return Ok(ProvisioningDecision::Ignore);
            }
            let Some(customer) = subscription.customer else {
                return Ok(ProvisioningDecision::Ignore);
            };
            Ok(ProvisioningDecision::Provision {
                customer,
                subscription: Some(subscription.id),
                metadata: subscription.metadata,
            })
        }
        "payment_intent.succeeded" | "payment_intent.processing" => {
            let intent: PaymentIntentObject = serde_json::from_value(object)?;
            // Subscription invoices provision through the subscription path.
            if intent.invoice.is_some() || !intent.metadata.contains_key("organizationName") {
                return Ok(ProvisioningDecision::Ignore);
            }
            let Some(customer) = intent.customer else {
                return Ok(ProvisioningDecision::Ignore);
            };
            Ok(ProvisioningDecision::Provision {
                customer,
                subscription: None,
                metadata: intent.metadata,
            })
        }
        "invoice.payment_failed" => {
            let invoice: InvoiceObject = serde_json::from_value(object)?;
            Ok(ProvisioningDecision::MarkPastDue {
                subscription: invoice.subscription,
                customer: invoice.customer,
            })
        }
        "checkout.session.async_payment_failed" => {
            let session: SessionObject = serde_json::from_value(object)?;
            Ok(ProvisioningDecision::MarkPastDue {
                subscription: session.subscription,
                customer: session.customer,
            })
        }
        "payment_intent.payment_failed" => {
            let intent: PaymentIntentObject = serde_json::from_value(object)?;
            Ok(ProvisioningDecision::MarkPastDue {
                subscription: None,
                customer: intent.customer,
            })
        }
        _ => Ok(ProvisioningDecision::Ignore),
    }
}

impl ProvisioningService {
    /// Applies a verified webhook event.
    ///
    /// Database work runs in one transaction keyed by the event id, so a
    /// replay is a no-op and a mid-flight failure rolls everything back.
    /// Identity-provider sync happens strictly after commit.
    pub async fn process_event(
        pool: &PgPool,
        idp: &Auth0Client,
        event: &StripeEvent,
    ) -> Result<(), AppError> {
        let decision = decide(event)?;
        if decision == ProvisioningDecision::Ignore {
            info!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        if !event_repo::try_record_event(&mut tx, &event.id, &event.event_type).await? {
            info!(event_id = %event.id, "webhook event replayed, skipping");
            tx.rollback().await?;
            return Ok(());
        }

        match decision {
            ProvisioningDecision::Provision {
                customer,
                subscription,
                metadata,
            } => {
                let provisioned =
                    match Self::provision(tx, &customer, subscription.as_deref(), &metadata).await
                    {
                        Ok(provisioned) => provisioned,
                        // Lost a race against a concurrent delivery that got
                        // past the ledger. The tenant exists either way, so
                        // the sender must not retry.
                        Err(AppError::Conflict(reason)) => {
                            info!(event_id = %event.id, %customer, %reason, "provisioning already applied");
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    };
                if let Some(provisioned) = provisioned {
                    Self::sync_identity_provider(
                        pool,
                        idp,
                        &provisioned.organization_id,
                        &provisioned.decoded,
                    )
                    .await;
                }
                Ok(())
            }
            ProvisioningDecision::MarkPastDue {
                subscription,
                customer,
            } => {
                let mut touched = 0;
                if let Some(subscription_id) = subscription.as_deref() {
                    touched +=
                        department_repo::mark_past_due_by_subscription(&mut tx, subscription_id)
                            .await?;
                }
                if touched == 0
                    && let Some(customer_id) = customer.as_deref()
                {
                    touched +=
                        department_repo::mark_past_due_by_customer(&mut tx, customer_id).await?;
                }
                tx.commit().await?;
                info!(
                    event_id = %event.id,
                    departments = touched,
                    "departments marked past due"
                );
                Ok(())
            }
            ProvisioningDecision::Ignore => Ok(()),
        }
    }

    /// Materializes the tenant records and commits. Returns None when the
    /// payment was already provisioned. Any error drops the transaction,
    /// which also releases the event-ledger claim for a later retry.
    async fn provision(
        mut tx: Transaction<'_, Postgres>,
        customer: &str,
        subscription: Option<&str>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Option<ProvisionedTenant>, AppError> {
        if department_repo::department_exists_for_payment(&mut tx, customer, subscription).await? {
            info!(%customer, "department already provisioned for this payment");
            tx.commit().await?;
            return Ok(None);
        }

        let decoded = decode_metadata(metadata)?;
        let plan = metadata
            .get("plan")
            .and_then(|value| PlanTier::from_claim(value))
            .unwrap_or_default();

        let billing_address_id = match decoded.billing_address.as_ref() {
            Some(billing) => Some(
                address_repo::create_address(&mut tx, billing, decoded.nif.as_deref())
                    .await?
                    .id,
            ),
            None => None,
        };
        let shipping_address_id = match decoded.shipping_address.as_ref() {
            Some(shipping) if decoded.has_different_shipping => {
                Some(address_repo::create_address(&mut tx, shipping, None).await?.id)
            }
            // Same address: alias the billing row instead of duplicating it.
            Some(_) | None => billing_address_id,
        };

        let organization =
            match org_repo::find_organization_by_name(&mut tx, &decoded.organization_name).await? {
                Some(existing) => existing,
                None => {
                    org_repo::create_organization(
                        &mut tx,
                        &decoded.organization_name,
                        None,
                        ExternalSyncStatus::Pending,
                    )
                    .await?
                }
            };

        // Slugs are globally unique; suffix until a free one is found.
        let base_slug = slugify(&decoded.department_name);
        let mut attempt = 1u32;
        let mut slug = slug_candidate(&base_slug, attempt);
        while department_repo::department_slug_exists(&mut tx, &slug).await? {
            attempt += 1;
            slug = slug_candidate(&base_slug, attempt);
        }

        let department = department_repo::create_department(
            &mut tx,
            department_repo::NewDepartment {
                organization_id: organization.id,
                name: &decoded.department_name,
                slug: &slug,
                sub_status: SubscriptionStatus::Active,
                plan,
                stripe_customer_id: customer,
                stripe_subscription_id: subscription,
                billing_address_id,
                shipping_address_id,
            },
        )
        .await?;
        tx.commit().await?;
        info!(
            organization_id = %organization.id,
            department_id = %department.id,
            %customer,
            "tenant provisioned"
        );

        Ok(Some(ProvisionedTenant {
            organization_id: organization.id,
            decoded,
        }))
    }

    /// Best-effort identity-provider sync after the provisioning commit.
    ///
    /// Failures are recorded on the organization row for reconciliation,
    /// never propagated: the webhook already succeeded and the sender must
    /// not retry a committed provisioning.
    async fn sync_identity_provider(
        pool: &PgPool,
        idp: &Auth0Client,
        organization_id: &Uuid,
        decoded: &DecodedCheckout,
    ) {
        let slug = slugify(&decoded.organization_name);
        let auth0_org_id = match idp.create_org(&slug, &decoded.organization_name, None).await {
            Ok(OrgCreateOutcome::Created { org_id }) => Some(org_id),
            Ok(OrgCreateOutcome::AlreadyExists) => match idp.check_org_exists(&slug).await {
                Ok(Some(existing)) => Some(existing.id),
                Ok(None) | Err(_) => None,
            },
            Err(err) => {
                warn!(%organization_id, error = %err, "identity-provider org creation failed");
                None
            }
        };

        let status = if auth0_org_id.is_some() {
            ExternalSyncStatus::Synced
        } else {
            ExternalSyncStatus::Failed
        };
        if let Err(err) =
            org_repo::set_external_sync(pool, *organization_id, auth0_org_id.as_deref(), status)
                .await
        {
            warn!(%organization_id, error = %err, "failed to record identity-provider sync state");
        }

        if let (Some(org_id), Some(email)) = (auth0_org_id.as_deref(), decoded.admin_email.as_deref())
        {
            if let Err(err) = idp.invite_admin_to_org(org_id, email).await {
                warn!(%organization_id, error = %err, "admin invitation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProvisioningDecision, decide};
    use crate::dto::webhooks::StripeEvent;

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_test_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .expect("event")
    }

    fn event_with_previous(
        event_type: &str,
        object: serde_json::Value,
        previous: serde_json::Value,
    ) -> StripeEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_test_1",
            "type": event_type,
            "data": { "object": object, "previous_attributes": previous }
        }))
        .expect("event")
    }

    #[test]
    fn completed_paid_session_provisions() {
        let event = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "payment_status": "paid",
                "metadata": { "organizationName": "Acme" }
            }),
        );

        match decide(&event).expect("decision") {
            ProvisioningDecision::Provision {
                customer,
                subscription,
                metadata,
            } => {
                assert_eq!(customer, "cus_1");
                assert_eq!(subscription.as_deref(), Some("sub_1"));
                assert_eq!(metadata.get("organizationName").map(String::as_str), Some("Acme"));
            }
            other => panic!("expected provision, got {:?}", other),
        }
    }

    #[test]
    fn processing_session_also_provisions() {
        // SEPA-style async payments report "processing" at completion time.
        let event = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "customer": "cus_1",
                "payment_status": "processing",
                "metadata": {}
            }),
        );

        assert!(matches!(
            decide(&event).expect("decision"),
            ProvisioningDecision::Provision { .. }
        ));
    }

    #[test]
    fn unpaid_session_is_ignored() {
        let event = event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "customer": "cus_1",
                "payment_status": "unpaid",
                "metadata": {}
            }),
        );

        assert_eq!(decide(&event).expect("decision"), ProvisioningDecision::Ignore);
    }

    #[test]
    fn subscription_activation_from_incomplete_provisions() {
        let event = event_with_previous(
            "customer.subscription.updated",
            serde_json::json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "metadata": { "organizationName": "Acme" }
            }),
            serde_json::json!({ "status": "incomplete" }),
        );

        match decide(&event).expect("decision") {
            ProvisioningDecision::Provision { subscription, .. } => {
                assert_eq!(subscription.as_deref(), Some("sub_1"));
            }
            other => panic!("expected provision, got {:?}", other),
        }
    }

    #[test]
    fn subscription_update_without_incomplete_transition_is_ignored() {
        let event = event_with_previous(
            "customer.subscription.updated",
            serde_json::json!({
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "metadata": {}
            }),
            serde_json::json!({ "default_payment_method": null }),
        );

        assert_eq!(decide(&event).expect("decision"), ProvisioningDecision::Ignore);
    }

    #[test]
    fn standalone_payment_intent_provisions_without_subscription() {
        let event = event(
            "payment_intent.succeeded",
            serde_json::json!({
                "id": "pi_1",
                "customer": "cus_1",
                "metadata": { "organizationName": "Acme" }
            }),
        );

        match decide(&event).expect("decision") {
            ProvisioningDecision::Provision { subscription, .. } => {
                assert_eq!(subscription, None);
            }
            other => panic!("expected provision, got {:?}", other),
        }
    }

    #[test]
    fn invoice_backed_payment_intent_is_ignored() {
        let event = event(
            "payment_intent.succeeded",
            serde_json::json!({
                "id": "pi_1",
                "customer": "cus_1",
                "invoice": "in_1",
                "metadata": { "organizationName": "Acme" }
            }),
        );

        assert_eq!(decide(&event).expect("decision"), ProvisioningDecision::Ignore);
    }

    #[test]
    fn failed_invoice_marks_past_due_by_subscription() {
        let event = event(
            "invoice.payment_failed",
            serde_json::json!({
                "id": "in_1",
                "customer": "cus_1",
                "subscription": "sub_123"
            }),
        );

        assert_eq!(
            decide(&event).expect("decision"),
            ProvisioningDecision::MarkPastDue {
                subscription: Some("sub_123".to_string()),
                customer: Some("cus_1".to_string()),
            }
        );
    }

    #[test]
    fn async_payment_failure_marks_past_due() {
        let event = event(
            "checkout.session.async_payment_failed",
            serde_json::json!({
                "id": "cs_1",
                "customer": "cus_1",
                "metadata": {}
            }),
        );

        assert!(matches!(
            decide(&event).expect("decision"),
            ProvisioningDecision::MarkPastDue { .. }
        ));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let event = event("customer.created", serde_json::json!({ "id": "cus_1" }));
        assert_eq!(decide(&event).expect("decision"), ProvisioningDecision::Ignore);
    }

    #[test]
    fn slug_candidates_add_numeric_suffixes() {
        use super::slug_candidate;

        assert_eq!(slug_candidate("studio", 1), "studio");
        assert_eq!(slug_candidate("studio", 2), "studio-2");
        assert_eq!(slug_candidate("studio", 3), "studio-3");
    }

    // Run with a disposable Postgres: DATABASE_URL=... cargo test -- --ignored
    mod database {
        use sqlx::postgres::PgPoolOptions;

        use crate::{
            app::config::AppConfig,
            dto::{checkout::AddressInput, webhooks::StripeEvent},
            repositories::{addresses as address_repo, webhook_events as event_repo},
            services::idp::Auth0Client,
            usecases::provisioning::ProvisioningService,
        };

        async fn pool() -> sqlx::PgPool {
            let url = std::env::var("DATABASE_URL")
                .expect("DATABASE_URL must point at a disposable test database");
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect(&url)
                .await
                .expect("connect");
            sqlx::migrate!().run(&pool).await.expect("migrate");
            pool
        }

        fn idp() -> Auth0Client {
            // Unroutable domain: identity-provider sync is expected to fail
            // and only mark the organization for reconciliation.
            let config = AppConfig {
                auth0_domain: "idp.invalid".to_string(),
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

        fn paid_session(
            event_id: &str,
            customer: &str,
            subscription: &str,
            organization: &str,
            department: &str,
        ) -> StripeEvent {
            serde_json::from_value(serde_json::json!({
                "id": event_id,
                "type": "checkout.session.completed",
                "data": {
                    "object": {
                        "id": format!("cs_{}", event_id),
                        "customer": customer,
                        "subscription": subscription,
                        "payment_status": "paid",
                        "metadata": {
                            "organizationName": organization,
                            "departmentName": department,
                            "adminEmail": "rita@acme.pt"
                        }
                    }
                }
            }))
            .expect("event")
        }

        #[tokio::test]
        #[ignore = "needs a migrated Postgres at DATABASE_URL"]
        async fn redelivered_payment_provisions_exactly_one_department() {
            let pool = pool().await;
            let idp = idp();
            let run = uuid::Uuid::new_v4().simple().to_string();
            let customer = format!("cus_{}", run);
            let subscription = format!("sub_{}", run);
            let org = format!("Org {}", run);

            let event = paid_session(&format!("evt_{}", run), &customer, &subscription, &org, "Studio");
            ProvisioningService::process_event(&pool, &idp, &event)
                .await
                .expect("first delivery");

            // Same event id: stopped by the ledger.
            ProvisioningService::process_event(&pool, &idp, &event)
                .await
                .expect("replayed delivery");

            // Fresh event id for the same payment: stopped by the payment guard.
            let second = paid_session(
                &format!("evt_{}_b", run),
                &customer,
                &subscription,
                &org,
                "Studio",
            );
            ProvisioningService::process_event(&pool, &idp, &second)
                .await
                .expect("second event");

            let departments: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM core.department WHERE stripe_customer_id = $1",
            )
            .bind(&customer)
            .fetch_one(&pool)
            .await
            .expect("count");
            assert_eq!(departments, 1);
        }

        #[tokio::test]
        #[ignore = "needs a migrated Postgres at DATABASE_URL"]
        async fn colliding_department_names_get_distinct_slugs() {
            let pool = pool().await;
            let idp = idp();
            let run = uuid::Uuid::new_v4().simple().to_string();
            let department = format!("Studio {}", run);
            let first_customer = format!("cus_{}_a", run);
            let second_customer = format!("cus_{}_b", run);

            let first = paid_session(
                &format!("evt_{}_a", run),
                &first_customer,
                &format!("sub_{}_a", run),
                &format!("Org {} A", run),
                &department,
            );
            let second = paid_session(
                &format!("evt_{}_b", run),
                &second_customer,
                &format!("sub_{}_b", run),
                &format!("Org {} B", run),
                &department,
            );
            ProvisioningService::process_event(&pool, &idp, &first)
                .await
                .expect("first tenant");
            ProvisioningService::process_event(&pool, &idp, &second)
                .await
                .expect("second tenant");

            let slugs: Vec<String> = sqlx::query_scalar(
                r#"
                    SELECT slug FROM core.department
                    WHERE stripe_customer_id IN ($1, $2)
                    ORDER BY created_at ASC
                "#,
            )
            .bind(&first_customer)
            .bind(&second_customer)
            .fetch_all(&pool)
            .await
            .expect("slugs");

            assert_eq!(slugs.len(), 2);
            assert_eq!(slugs[1], format!("{}-2", slugs[0]));
        }

        #[tokio::test]
        #[ignore = "needs a migrated Postgres at DATABASE_URL"]
        async fn dropped_transaction_releases_writes_and_ledger_claim() {
            let pool = pool().await;
            let run = uuid::Uuid::new_v4().simple().to_string();
            let event_id = format!("evt_{}", run);

            let mut tx = pool.begin().await.expect("tx");
            assert!(
                event_repo::try_record_event(&mut tx, &event_id, "checkout.session.completed")
                    .await
                    .expect("claim")
            );
            let address = address_repo::create_address(
                &mut tx,
                &AddressInput {
                    street: "Rua A 1".to_string(),
                    city: "Lisboa".to_string(),
                    zip_code: "1000-001".to_string(),
                    country: "PT".to_string(),
                },
                Some("502011378"),
            )
            .await
            .expect("address");
            drop(tx);

            let address_rows: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM core.address WHERE id = $1")
                    .bind(address.id)
                    .fetch_one(&pool)
                    .await
                    .expect("address lookup");
            assert_eq!(address_rows, 0);

            // The rollback released the claim, so a retry can take it again.
            let mut tx = pool.begin().await.expect("tx");
            assert!(
                event_repo::try_record_event(&mut tx, &event_id, "checkout.session.completed")
                    .await
                    .expect("reclaim")
            );
            tx.commit().await.expect("commit");

            let mut tx = pool.begin().await.expect("tx");
            assert!(
                !event_repo::try_record_event(&mut tx, &event_id, "checkout.session.completed")
                    .await
                    .expect("post-commit claim")
            );
            tx.rollback().await.expect("rollback");
        }
    }
}
