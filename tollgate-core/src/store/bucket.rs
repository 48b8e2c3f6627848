use std::time::{Duration, Instant};

use super::{BucketLimits, BucketSnapshot, Consumption};

/// Absorbs float drift so a bucket refilled for exactly `retry_after_ms`
/// is not denied by a rounding error.
const EPSILON: f64 = 1e-9;

/// Token bucket with continuous refill.
#[derive(Debug, Clone)]
pub struct Bucket {
    tokens: f64,
    last_refill_at: Instant,
    refill_interval: Duration,
}

impl Bucket {
    /// A new bucket starts full.
    pub fn new(limits: &BucketLimits, now: Instant) -> Self {
        Bucket {
            tokens: f64::from(limits.capacity),
            last_refill_at: now,
            refill_interval: limits.refill_interval(),
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_refill_at(&self) -> Instant {
        self.last_refill_at
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            tokens: self.tokens,
            last_refill_at: self.last_refill_at,
        }
    }

    /// Whether the bucket saw no refill for longer than `retention`.
    pub fn is_idle(&self, now: Instant, retention_factor: u32) -> bool {
        now.saturating_duration_since(self.last_refill_at) > self.refill_interval * retention_factor
    }

    /// Add the tokens accumulated since the last refill.
    pub fn refill(&mut self, limits: &BucketLimits, now: Instant) {
        let capacity = f64::from(limits.capacity);
        // An earlier `now` than the last refill counts as no time passed.
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        let elapsed_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
        let gained =
            elapsed_ms * f64::from(limits.refill_tokens) / limits.refill_interval_ms as f64;

        self.tokens = (self.tokens + gained).clamp(0.0, capacity);
        if now > self.last_refill_at {
            self.last_refill_at = now;
        }
        self.refill_interval = limits.refill_interval();
    }

    /// Refill, then take `cost` tokens if available.
    pub fn try_consume(&mut self, cost: u32, limits: &BucketLimits, now: Instant) -> Consumption {
        self.refill(limits, now);

        let cost = f64::from(cost);
        let allowed = self.tokens + EPSILON >= cost;
        if allowed {
            self.tokens = (self.tokens - cost).max(0.0);
        }

        let retry_after_ms = if allowed {
            0
        } else {
            millis_to_accumulate(cost - self.tokens, limits)
        };

        Consumption {
            allowed,
            remaining: (self.tokens + EPSILON).floor() as u64,
            retry_after_ms,
            reset_after_ms: millis_to_accumulate(f64::from(limits.capacity) - self.tokens, limits),
        }
    }
}

fn millis_to_accumulate(missing: f64, limits: &BucketLimits) -> u64 {
    if missing <= EPSILON {
        return 0;
    }
    (missing * limits.refill_interval_ms as f64 / f64::from(limits.refill_tokens)).ceil() as u64
}
