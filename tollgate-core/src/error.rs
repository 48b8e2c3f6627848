use std::time::Duration;

use thiserror::Error;

use crate::settings::rate_limiting::RateLimitingValidationError;

/// Errors raised while assembling the gate at startup.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Rate limiting configuration error: {0}")]
    Configuration(String),
}

impl From<RateLimitingValidationError> for GateError {
    fn from(e: RateLimitingValidationError) -> Self {
        GateError::Configuration(e.message)
    }
}

/// Errors returned by a bucket store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A single operation asks for more tokens than the bucket can ever hold.
    #[error("cost {cost} exceeds bucket capacity {capacity}")]
    CostExceedsCapacity { cost: u32, capacity: u32 },

    #[error("bucket store failure: {0}")]
    Internal(String),
}

/// Errors raised while delivering a violation event to a sink.
///
/// These never leave the reporter task.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("sink {sink} timed out after {timeout:?}")]
    Timeout { sink: String, timeout: Duration },

    #[error("sink {sink} failed: {source}")]
    Sink {
        sink: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("sink {sink} panicked")]
    Panicked { sink: String },
}
