//! Files inside project buckets.

pub mod handlers;
pub mod services;

pub use handlers::routes;
