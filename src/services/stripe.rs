use std::collections::BTreeMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepted clock drift for webhook signatures (replay protection).
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Thin Stripe API client over reqwest.
///
/// Constructed once at startup and passed through AppState; requests use the
/// form-encoded body convention of the Stripe v1 API.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    pub unit_amount: Option<i64>,
    pub currency: String,
    /// "recurring" or "one_time".
    #[serde(rename = "type")]
    pub price_type: String,
}

impl Price {
    pub fn is_recurring(&self) -> bool {
        self.price_type == "recurring"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub payment_intent: Option<PaymentIntent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    pub latest_invoice: Option<Invoice>,
    pub pending_setup_intent: Option<SetupIntent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl StripeClient {
    pub fn new(secret_key: String, webhook_secret: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            secret_key,
            webhook_secret,
            api_base: API_BASE.to_string(),
        })
    }

    /// Verifies a `Stripe-Signature` header against the raw request body.
    ///
    /// The header carries `t=<unix>,v1=<hex hmac>`; the signed payload is
    /// `"{t}.{body}"`. Signatures older than the tolerance window are
    /// rejected even when the MAC matches.
    pub fn verify_webhook_signature(&self, payload: &[u8], header: &str) -> Result<(), AppError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            AppError::SignatureVerification("Missing timestamp in signature header".to_string())
        })?;
        if signatures.is_empty() {
            return Err(AppError::SignatureVerification(
                "Missing v1 signature in signature header".to_string(),
            ));
        }

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age.abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(AppError::SignatureVerification(
                "Signature timestamp outside tolerance".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("HMAC key setup failed".to_string()))?;
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        if signatures.iter().any(|sig| constant_time_eq(sig, &expected)) {
            Ok(())
        } else {
            Err(AppError::SignatureVerification(
                "Signature mismatch".to_string(),
            ))
        }
    }

    pub async fn get_price(&self, price_id: &str) -> Result<Price, AppError> {
        self.get(&format!("/prices/{}", urlencoding::encode(price_id)))
            .await
    }

    pub async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, AppError> {
        let list: CustomerList = self
            .get(&format!(
                "/customers?email={}&limit=1",
                urlencoding::encode(email)
            ))
            .await?;

        Ok(list.data.into_iter().next())
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Customer, AppError> {
        let mut params = vec![
            ("email".to_string(), email.to_string()),
            ("name".to_string(), name.to_string()),
        ];
        push_metadata(&mut params, metadata);

        self.post("/customers", &params).await
    }

    pub async fn update_customer_metadata(
        &self,
        customer_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Customer, AppError> {
        let mut params = Vec::new();
        push_metadata(&mut params, metadata);

        self.post(
            &format!("/customers/{}", urlencoding::encode(customer_id)),
            &params,
        )
        .await
    }

    /// Creates an incomplete-start subscription, attaching one-time prices as
    /// first-invoice add-on items and expanding both client-secret carriers.
    pub async fn create_subscription(
        &self,
        customer_id: &str,
        recurring_items: &[(String, u32)],
        one_time_items: &[(String, u32)],
        metadata: &BTreeMap<String, String>,
    ) -> Result<Subscription, AppError> {
        let mut params = vec![
            ("customer".to_string(), customer_id.to_string()),
            (
                "payment_behavior".to_string(),
                "default_incomplete".to_string(),
            ),
            (
                "payment_settings[save_default_payment_method]".to_string(),
                "on_subscription".to_string(),
            ),
            (
                "expand[]".to_string(),
                "latest_invoice.payment_intent".to_string(),
            ),
            ("expand[]".to_string(), "pending_setup_intent".to_string()),
        ];
        for (i, (price, quantity)) in recurring_items.iter().enumerate() {
            params.push((format!("items[{}][price]", i), price.clone()));
            params.push((format!("items[{}][quantity]", i), quantity.to_string()));
        }
        for (i, (price, quantity)) in one_time_items.iter().enumerate() {
            params.push((format!("add_invoice_items[{}][price]", i), price.clone()));
            params.push((
                format!("add_invoice_items[{}][quantity]", i),
                quantity.to_string(),
            ));
        }
        push_metadata(&mut params, metadata);

        self.post("/subscriptions", &params).await
    }

    pub async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        customer_id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, AppError> {
        let mut params = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), currency.to_string()),
            ("customer".to_string(), customer_id.to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        push_metadata(&mut params, metadata);

        self.post("/payment_intents", &params).await
    }

    pub async fn create_setup_intent(
        &self,
        customer_id: &str,
        subscription_id: &str,
    ) -> Result<SetupIntent, AppError> {
        let params = vec![
            ("customer".to_string(), customer_id.to_string()),
            (
                "metadata[subscription_id]".to_string(),
                subscription_id.to_string(),
            ),
        ];

        self.post("/setup_intents", &params).await
    }

    pub async fn create_checkout_session(
        &self,
        mode: &str,
        customer_email: &str,
        line_items: &[(String, u32)],
        metadata: &BTreeMap<String, String>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let mut params = vec![
            ("mode".to_string(), mode.to_string()),
            ("customer_email".to_string(), customer_email.to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
        ];
        for (i, (price, quantity)) in line_items.iter().enumerate() {
            params.push((format!("line_items[{}][price]", i), price.clone()));
            params.push((format!("line_items[{}][quantity]", i), quantity.to_string()));
        }
        push_metadata(&mut params, metadata);

        self.post("/checkout/sessions", &params).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe request failed: {}", e)))?;

        Self::read_response(response).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe request failed: {}", e)))?;

        Self::read_response(response).await
    }

    async fn read_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe response read failed: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::PaymentProvider(format!(
                "Stripe returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::PaymentProvider(format!("Stripe response parse failed: {}", e)))
    }
}

fn push_metadata(params: &mut Vec<(String, String)>, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("metadata[{}]", key), value.clone()));
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> StripeClient {
        StripeClient::new(
            "sk_test_xxx".to_string(),
            "whsec_test123secret456".to_string(),
        )
        .expect("client")
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let client = test_client();
        let payload = b"{\"type\":\"checkout.session.completed\"}";
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(payload, "whsec_test123secret456", timestamp);
        let header = format!("t={},v1={}", timestamp, signature);

        assert!(client.verify_webhook_signature(payload, &header).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let client = test_client();
        let payload = b"{\"type\":\"checkout.session.completed\"}";
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(payload, "wrong_secret", timestamp);
        let header = format!("t={},v1={}", timestamp, signature);

        assert!(client.verify_webhook_signature(payload, &header).is_err());
    }

    #[test]
    fn modified_payload_is_rejected() {
        let client = test_client();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(b"{\"a\":1}", "whsec_test123secret456", timestamp);
        let header = format!("t={},v1={}", timestamp, signature);

        assert!(
            client
                .verify_webhook_signature(b"{\"a\":2}", &header)
                .is_err()
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let client = test_client();
        let payload = b"{}";
        let timestamp = chrono::Utc::now().timestamp() - 600;
        let signature = sign(payload, "whsec_test123secret456", timestamp);
        let header = format!("t={},v1={}", timestamp, signature);

        assert!(client.verify_webhook_signature(payload, &header).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let client = test_client();
        assert!(client.verify_webhook_signature(b"{}", "").is_err());
        assert!(client.verify_webhook_signature(b"{}", "garbage").is_err());
        assert!(
            client
                .verify_webhook_signature(b"{}", "v1=deadbeef")
                .is_err()
        );
        assert!(
            client
                .verify_webhook_signature(b"{}", "t=1234567890")
                .is_err()
        );
    }

    #[test]
    fn price_recurrence_classification() {
        let recurring = Price {
            id: "price_abc".to_string(),
            unit_amount: Some(4900),
            currency: "eur".to_string(),
            price_type: "recurring".to_string(),
        };
        let one_time = Price {
            id: "price_hw".to_string(),
            unit_amount: Some(15000),
            currency: "eur".to_string(),
            price_type: "one_time".to_string(),
        };

        assert!(recurring.is_recurring());
        assert!(!one_time.is_recurring());
    }
}
