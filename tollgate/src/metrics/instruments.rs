use opentelemetry::metrics::{Counter, Gauge, Meter};

/// Rate limiting instruments
#[derive(Clone)]
pub struct GateMetrics {
    /// Admission decisions, labelled by tier and decision
    pub rate_limit_requests: Counter<u64>,
    pub rate_limit_fail_open: Counter<u64>,

    pub buckets_active: Gauge<i64>,
    pub buckets_evicted: Counter<u64>,
}

impl GateMetrics {
    pub fn new(meter: Meter) -> Self {
        Self {
            rate_limit_requests: meter
                .u64_counter("tollgate.rate_limit.requests")
                .with_description("Admission decisions by tier and outcome")
                .build(),

            rate_limit_fail_open: meter
                .u64_counter("tollgate.rate_limit.fail_open")
                .with_description("Requests admitted because the bucket store failed")
                .build(),

            buckets_active: meter
                .i64_gauge("tollgate.buckets.active")
                .with_description("Buckets currently held in the store")
                .build(),

            buckets_evicted: meter
                .u64_counter("tollgate.buckets.evicted")
                .with_description("Idle buckets removed by the sweeper")
                .build(),
        }
    }
}
