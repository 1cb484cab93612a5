pub mod checkout;
pub mod entitlements;
pub mod registration;
pub mod webhooks;
