pub mod gates;
pub mod middleware;
pub mod policy;
pub mod session;
