use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tollgate_core::AdmissionDecision;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationBody {
    pub success: bool,
    pub message: String,
    pub retry_after_seconds: u64,
}

/// Unix timestamp (seconds) at which the bucket is full again.
fn reset_at(decision: &AdmissionDecision) -> u64 {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    now + decision.reset_after_secs()
}

pub fn apply_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at(decision)));
}

pub fn too_many_requests(decision: &AdmissionDecision, message: &str) -> Response {
    let retry_after = decision.retry_after_secs();
    let body = ViolationBody {
        success: false,
        message: message.to_string(),
        retry_after_seconds: retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
