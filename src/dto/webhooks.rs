use std::collections::BTreeMap;

use serde::Deserialize;

/// Minimal webhook event envelope. `data.object` stays untyped until the
/// dispatcher knows which shape the event type carries.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

/// `checkout.session.completed` payload, unexpanded ids only.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    pub status: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    /// Present when the intent belongs to a subscription invoice; those are
    /// provisioned through the subscription path instead.
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct WebhookAck {
    pub received: bool,
}
