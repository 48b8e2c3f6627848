pub mod api_server;
pub mod rate_limiting;
pub mod scheduler_interval;
