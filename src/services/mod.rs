pub mod idp;
pub mod stripe;
