use std::collections::BTreeMap;

use tracing::info;

use crate::{
    app::config::AppConfig,
    dto::checkout::{
        CheckoutRequest, EmbeddedCheckoutResponse, HostedCheckoutResponse, encode_metadata,
    },
    error::AppError,
    services::stripe::{Price, StripeClient},
    validation::{is_valid_email, is_valid_nif},
};

pub struct CheckoutService;

impl CheckoutService {
    /// Hosted flow: validates the form, classifies the cart and creates a
    /// checkout session. One recurring line item puts the whole session in
    /// subscription mode.
    pub async fn create_hosted_session(
        stripe: &StripeClient,
        config: &AppConfig,
        req: &CheckoutRequest,
    ) -> Result<HostedCheckoutResponse, AppError> {
        let (metadata, items) = Self::validate(req)?;

        let mut any_recurring = false;
        for (price_id, _) in &items {
            let price = stripe.get_price(price_id).await?;
            any_recurring |= price.is_recurring();
        }
        let mode = if any_recurring { "subscription" } else { "payment" };

        let base = config.app_base_url.trim_end_matches('/');
        let session = stripe
            .create_checkout_session(
                mode,
                req.form.admin_email.trim(),
                &items,
                &metadata,
                &format!("{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}", base),
                &format!("{}/checkout?canceled=true", base),
            )
            .await?;
        info!(session_id = %session.id, mode, "checkout session created");

        let url = session.url.ok_or_else(|| {
            AppError::PaymentProvider("Checkout session came back without a URL".to_string())
        })?;

        Ok(HostedCheckoutResponse { url })
    }

    /// Embedded flow: finds or creates the customer and returns a client
    /// secret for payment-element confirmation.
    ///
    /// Recurring carts start an incomplete subscription; the secret comes
    /// from the first invoice's payment intent when money is due now, from
    /// the pending setup intent when it is not (trials, free first period),
    /// and from a fresh setup intent as the last resort. One-time carts get
    /// a plain payment intent over the summed price amounts.
    pub async fn create_embedded_intent(
        stripe: &StripeClient,
        req: &CheckoutRequest,
    ) -> Result<EmbeddedCheckoutResponse, AppError> {
        let (metadata, items) = Self::validate(req)?;

        let mut recurring: Vec<(String, u32)> = Vec::new();
        let mut one_time: Vec<(String, u32)> = Vec::new();
        let mut prices: Vec<(Price, u32)> = Vec::new();
        for (price_id, quantity) in items {
            let price = stripe.get_price(&price_id).await?;
            if price.is_recurring() {
                recurring.push((price_id, quantity));
            } else {
                one_time.push((price_id, quantity));
            }
            prices.push((price, quantity));
        }

        let email = req.form.admin_email.trim();
        let customer = match stripe.find_customer_by_email(email).await? {
            Some(existing) => {
                stripe.update_customer_metadata(&existing.id, &metadata).await?
            }
            None => {
                stripe
                    .create_customer(email, req.form.admin_full_name.trim(), &metadata)
                    .await?
            }
        };

        if recurring.is_empty() {
            let total: i64 = prices
                .iter()
                .map(|(price, quantity)| price.unit_amount.unwrap_or(0) * i64::from(*quantity))
                .sum();
            if total <= 0 {
                return Err(AppError::BadRequest(
                    "Cart total is zero; nothing to charge".to_string(),
                ));
            }
            let currency = prices
                .first()
                .map(|(price, _)| price.currency.clone())
                .unwrap_or_else(|| "eur".to_string());

            let intent = stripe
                .create_payment_intent(total, &currency, &customer.id, &metadata)
                .await?;
            let client_secret = intent.client_secret.ok_or_else(|| {
                AppError::PaymentProvider("Payment intent came back without a client secret".to_string())
            })?;
            return Ok(EmbeddedCheckoutResponse {
                subscription_id: None,
                client_secret,
            });
        }

        let subscription = stripe
            .create_subscription(&customer.id, &recurring, &one_time, &metadata)
            .await?;
        info!(subscription_id = %subscription.id, "incomplete subscription created");

        let invoice_secret = subscription
            .latest_invoice
            .as_ref()
            .and_then(|invoice| invoice.payment_intent.as_ref())
            .and_then(|intent| intent.client_secret.clone());
        let setup_secret = subscription
            .pending_setup_intent
            .as_ref()
            .and_then(|intent| intent.client_secret.clone());

        let client_secret = match invoice_secret.or(setup_secret) {
            Some(secret) => secret,
            None => {
                let setup = stripe
                    .create_setup_intent(&customer.id, &subscription.id)
                    .await?;
                setup.client_secret.ok_or_else(|| {
                    AppError::PaymentProvider(
                        "Setup intent came back without a client secret".to_string(),
                    )
                })?
            }
        };

        Ok(EmbeddedCheckoutResponse {
            subscription_id: Some(subscription.id),
            client_secret,
        })
    }

    fn validate(
        req: &CheckoutRequest,
    ) -> Result<(BTreeMap<String, String>, Vec<(String, u32)>), AppError> {
        if !is_valid_email(&req.form.admin_email) {
            return Err(AppError::ValidationError(
                "A valid admin email is required".to_string(),
            ));
        }
        if !is_valid_nif(&req.form.nif) {
            return Err(AppError::ValidationError(
                "A valid Portuguese NIF is required".to_string(),
            ));
        }
        if req.line_items.is_empty() {
            return Err(AppError::ValidationError(
                "At least one line item is required".to_string(),
            ));
        }
        if req.line_items.iter().any(|item| item.quantity == 0) {
            return Err(AppError::ValidationError(
                "Line item quantities must be positive".to_string(),
            ));
        }

        let metadata = encode_metadata(&req.form);
        let items = req
            .line_items
            .iter()
            .map(|item| (item.price.clone(), item.quantity))
            .collect();

        Ok((metadata, items))
    }
}

#[cfg(test)]
mod tests {
    use super::CheckoutService;
    use crate::dto::checkout::{AddressInput, CheckoutForm, CheckoutRequest, LineItem};

    fn request(nif: &str, email: &str, items: Vec<LineItem>) -> CheckoutRequest {
        CheckoutRequest {
            form: CheckoutForm {
                organization_name: "Acme".to_string(),
                department_name: "Studio".to_string(),
                nif: nif.to_string(),
                internal_reference: None,
                admin_full_name: "Rita Gomes".to_string(),
                admin_email: email.to_string(),
                job_title: None,
                phone: None,
                billing_address: AddressInput {
                    street: "Rua A 1".to_string(),
                    city: "Porto".to_string(),
                    zip_code: "4000-001".to_string(),
                    country: "PT".to_string(),
                },
                shipping_address: None,
            },
            line_items: items,
        }
    }

    #[test]
    fn validate_rejects_bad_nif() {
        let req = request(
            "502011379",
            "rita@acme.pt",
            vec![LineItem { price: "price_abc".to_string(), quantity: 1 }],
        );
        assert!(CheckoutService::validate(&req).is_err());
    }

    #[test]
    fn validate_rejects_empty_cart_and_zero_quantities() {
        let empty = request("502011378", "rita@acme.pt", vec![]);
        assert!(CheckoutService::validate(&empty).is_err());

        let zero = request(
            "502011378",
            "rita@acme.pt",
            vec![LineItem { price: "price_abc".to_string(), quantity: 0 }],
        );
        assert!(CheckoutService::validate(&zero).is_err());
    }

    #[test]
    fn validate_builds_metadata_and_items() {
        let req = request(
            "502011378",
            "rita@acme.pt",
            vec![LineItem { price: "price_abc".to_string(), quantity: 2 }],
        );

        let (metadata, items) = CheckoutService::validate(&req).expect("valid");
        assert_eq!(items, vec![("price_abc".to_string(), 2)]);
        assert_eq!(metadata.get("organizationName").map(String::as_str), Some("Acme"));
        assert_eq!(
            metadata.get("hasDifferentShipping").map(String::as_str),
            Some("false")
        );
    }
}
