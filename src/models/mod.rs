pub mod addresses;
pub mod departments;
pub mod organizations;
pub mod users;
