//! Admission gate for API endpoints
//!
//! Every routed request is charged against the global tier and the tier its
//! path resolves to. Denied requests get a `429` and, depending on the tier's
//! `on_violation` setting, a violation event for the reporter.

pub mod middleware;
pub mod response;

pub use middleware::rate_limit_middleware;

/// Request extension that pins the tier used for the resource charge,
/// regardless of the route table. Insert it with `axum::Extension` as a
/// layer outside the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedTier(pub String);

impl ForcedTier {
    pub fn new(tier: &str) -> Self {
        ForcedTier(tier.to_string())
    }
}
