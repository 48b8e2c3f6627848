//! OpenTelemetry metrics for tollgate
//!
//! Instruments are created once by [`init_metrics`]. Until then, and when
//! metrics are disabled, every `record_*` helper is a no-op.

mod init;
mod instruments;

use std::sync::OnceLock;

use opentelemetry::KeyValue;
use tollgate_core::{AdmissionDecision, DecisionReason};

pub use init::init_metrics;
pub use instruments::GateMetrics;

static METRICS: OnceLock<GateMetrics> = OnceLock::new();

/// Get the global metrics instance if initialized
pub fn get_metrics() -> Option<&'static GateMetrics> {
    METRICS.get()
}

pub(crate) fn set_metrics(metrics: GateMetrics) {
    let _ = METRICS.set(metrics);
}

fn decision_label(decision: &AdmissionDecision) -> &'static str {
    match decision.reason {
        DecisionReason::Admitted => "allowed",
        DecisionReason::LimitExceeded => "denied",
        DecisionReason::Misconfigured => "misconfigured",
        DecisionReason::FailOpen => "fail_open",
    }
}

pub fn record_decision(decision: &AdmissionDecision) {
    if let Some(m) = get_metrics() {
        let tier = decision
            .limiting_tier
            .clone()
            .unwrap_or_else(|| decision.resource_tier.clone());
        m.rate_limit_requests.add(
            1,
            &[
                KeyValue::new("tier", tier),
                KeyValue::new("decision", decision_label(decision)),
            ],
        );
        if decision.reason == DecisionReason::FailOpen {
            m.rate_limit_fail_open.add(1, &[]);
        }
    }
}

pub fn record_sweep(removed: usize, remaining: usize) {
    if let Some(m) = get_metrics() {
        m.buckets_evicted.add(removed as u64, &[]);
        m.buckets_active.record(remaining as i64, &[]);
    }
}

pub fn record_bucket_count(count: usize) {
    if let Some(m) = get_metrics() {
        m.buckets_active.record(count as i64, &[]);
    }
}
