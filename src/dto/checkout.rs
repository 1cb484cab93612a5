use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Payment processors cap metadata values; longer fields are truncated, not rejected.
pub const METADATA_VALUE_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    pub street: String,
    pub city: String,
    pub zip_code: String,
    pub country: String,
}

/// Checkout form payload. Transient: flattened into intent metadata and only
/// rehydrated when the corresponding webhook event arrives.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutForm {
    pub organization_name: String,
    pub department_name: String,
    pub nif: String,
    #[serde(default)]
    pub internal_reference: Option<String>,
    pub admin_full_name: String,
    pub admin_email: String,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub billing_address: AddressInput,
    #[serde(default)]
    pub shipping_address: Option<AddressInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    pub price: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub form: CheckoutForm,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct HostedCheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedCheckoutResponse {
    pub subscription_id: Option<String>,
    pub client_secret: String,
}

/// Checkout form rehydrated from intent metadata during provisioning.
///
/// Only the organization name is mandatory: events raised outside the
/// checkout flow (dashboard-created subscriptions, replays of trimmed
/// metadata) may carry nothing else, and provisioning still has to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCheckout {
    pub organization_name: String,
    pub department_name: String,
    pub nif: Option<String>,
    pub internal_reference: Option<String>,
    pub admin_email: Option<String>,
    pub billing_address: Option<AddressInput>,
    /// Equals the billing address when the form did not supply a distinct one.
    pub shipping_address: Option<AddressInput>,
    pub has_different_shipping: bool,
}

fn truncated(key: &str, value: &str) -> String {
    if value.chars().count() > METADATA_VALUE_MAX_CHARS {
        tracing::warn!(key, "metadata value truncated to {} chars", METADATA_VALUE_MAX_CHARS);
        value.chars().take(METADATA_VALUE_MAX_CHARS).collect()
    } else {
        value.to_string()
    }
}

fn insert(map: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if !value.is_empty() {
        map.insert(key.to_string(), truncated(key, value));
    }
}

/// Flattens the checkout form into string metadata for the payment intent or
/// session. Keys stay camelCase: they are an external wire contract shared
/// with the processor dashboard and the webhook decoder.
pub fn encode_metadata(form: &CheckoutForm) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    insert(&mut map, "organizationName", &form.organization_name);
    insert(&mut map, "departmentName", &form.department_name);
    insert(&mut map, "nif", &form.nif);
    if let Some(reference) = form.internal_reference.as_deref() {
        insert(&mut map, "internalReference", reference);
    }
    insert(&mut map, "adminFullName", &form.admin_full_name);
    insert(&mut map, "adminEmail", &form.admin_email);
    if let Some(job_title) = form.job_title.as_deref() {
        insert(&mut map, "jobTitle", job_title);
    }
    if let Some(phone) = form.phone.as_deref() {
        insert(&mut map, "phone", phone);
    }

    insert(&mut map, "billingStreet", &form.billing_address.street);
    insert(&mut map, "billingCity", &form.billing_address.city);
    insert(&mut map, "billingZip", &form.billing_address.zip_code);
    insert(&mut map, "billingCountry", &form.billing_address.country);

    if let Some(shipping) = form.shipping_address.as_ref() {
        map.insert("hasDifferentShipping".to_string(), "true".to_string());
        insert(&mut map, "shippingStreet", &shipping.street);
        insert(&mut map, "shippingCity", &shipping.city);
        insert(&mut map, "shippingZip", &shipping.zip_code);
        insert(&mut map, "shippingCountry", &shipping.country);
    } else {
        map.insert("hasDifferentShipping".to_string(), "false".to_string());
    }

    map
}

fn decode_address(map: &BTreeMap<String, String>, prefix: &str) -> Option<AddressInput> {
    let field = |suffix: &str| map.get(&format!("{}{}", prefix, suffix)).cloned();

    Some(AddressInput {
        street: field("Street")?,
        city: field("City")?,
        zip_code: field("Zip")?,
        country: field("Country")?,
    })
}

/// Rehydrates a checkout form from intent metadata.
///
/// Fails only when the tenant-defining organization name is missing; every
/// other field decodes to None when absent. A missing shipping block falls
/// back to billing.
pub fn decode_metadata(map: &BTreeMap<String, String>) -> Result<DecodedCheckout, AppError> {
    let organization_name = map
        .get("organizationName")
        .cloned()
        .ok_or_else(|| AppError::BadRequest("Missing metadata field organizationName".to_string()))?;
    let department_name = map
        .get("departmentName")
        .cloned()
        .unwrap_or_else(|| organization_name.clone());

    let billing_address = decode_address(map, "billing");
    let has_different_shipping = map
        .get("hasDifferentShipping")
        .is_some_and(|value| value == "true");
    let shipping_address = if has_different_shipping {
        decode_address(map, "shipping").or_else(|| billing_address.clone())
    } else {
        billing_address.clone()
    };

    Ok(DecodedCheckout {
        organization_name,
        department_name,
        nif: map.get("nif").cloned(),
        internal_reference: map.get("internalReference").cloned(),
        admin_email: map.get("adminEmail").cloned(),
        billing_address,
        shipping_address,
        has_different_shipping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_form(shipping: Option<AddressInput>) -> CheckoutForm {
        CheckoutForm {
            organization_name: "Acme Fotografia".to_string(),
            department_name: "Production".to_string(),
            nif: "502011378".to_string(),
            internal_reference: Some("PO-2026-001".to_string()),
            admin_full_name: "Rita Gomes".to_string(),
            admin_email: "rita@acme.pt".to_string(),
            job_title: None,
            phone: None,
            billing_address: AddressInput {
                street: "Rua das Flores 1".to_string(),
                city: "Porto".to_string(),
                zip_code: "4000-001".to_string(),
                country: "PT".to_string(),
            },
            shipping_address: shipping,
        }
    }

    #[test]
    fn round_trip_with_distinct_shipping() {
        let shipping = AddressInput {
            street: "Av. da Liberdade 100".to_string(),
            city: "Lisboa".to_string(),
            zip_code: "1250-096".to_string(),
            country: "PT".to_string(),
        };
        let form = sample_form(Some(shipping.clone()));

        let decoded = decode_metadata(&encode_metadata(&form)).expect("decode");

        assert_eq!(decoded.organization_name, "Acme Fotografia");
        assert_eq!(decoded.department_name, "Production");
        assert_eq!(decoded.nif.as_deref(), Some("502011378"));
        assert_eq!(decoded.billing_address.as_ref(), Some(&form.billing_address));
        assert_eq!(decoded.shipping_address, Some(shipping));
        assert!(decoded.has_different_shipping);
    }

    #[test]
    fn shipping_falls_back_to_billing() {
        let form = sample_form(None);
        let encoded = encode_metadata(&form);
        assert_eq!(
            encoded.get("hasDifferentShipping").map(String::as_str),
            Some("false")
        );

        let decoded = decode_metadata(&encoded).expect("decode");
        assert_eq!(decoded.shipping_address, decoded.billing_address);
        assert!(decoded.shipping_address.is_some());
        assert!(!decoded.has_different_shipping);
    }

    #[test]
    fn bare_organization_metadata_still_decodes() {
        let mut map = BTreeMap::new();
        map.insert("organizationName".to_string(), "Acme".to_string());

        let decoded = decode_metadata(&map).expect("decode");
        assert_eq!(decoded.organization_name, "Acme");
        assert_eq!(decoded.department_name, "Acme");
        assert_eq!(decoded.billing_address, None);
        assert_eq!(decoded.shipping_address, None);
    }

    #[test]
    fn long_values_are_truncated_not_rejected() {
        let mut form = sample_form(None);
        form.organization_name = "x".repeat(800);

        let encoded = encode_metadata(&form);
        let stored = encoded.get("organizationName").expect("value");
        assert_eq!(stored.chars().count(), METADATA_VALUE_MAX_CHARS);
    }

    #[test]
    fn decode_requires_organization_name() {
        let mut map = encode_metadata(&sample_form(None));
        map.remove("organizationName");

        assert!(decode_metadata(&map).is_err());
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let mut form = sample_form(None);
        form.internal_reference = None;
        form.phone = None;

        let encoded = encode_metadata(&form);
        assert!(!encoded.contains_key("internalReference"));
        assert!(!encoded.contains_key("phone"));
    }
}
