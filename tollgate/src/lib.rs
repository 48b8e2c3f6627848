//! tollgate server library
//!
//! The binary is a thin wrapper; router and state construction live here so
//! integration tests can drive them directly.

pub mod api;
pub mod app_state;
pub mod http;
pub mod init_telemetry;
pub mod metrics;
pub mod notification;
pub mod scheduler;
pub mod settings;
pub mod stop_flag;

pub use app_state::AppState;
