pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limiting;
pub mod router;
