pub mod checkout;
pub mod provisioning;
pub mod registration;
pub mod user_sync;
