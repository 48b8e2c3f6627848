//! Bucket storage.
//!
//! The engine only talks to buckets through [`Store`], so the in-memory map
//! can be swapped for an external shared store without touching policy code.

mod bucket;
mod memory;

use std::fmt::Debug;
use std::time::{Duration, Instant};

pub use bucket::Bucket;
pub use memory::InMemoryStore;

use crate::error::StoreError;

/// Refill parameters of a bucket, taken from its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimits {
    pub capacity: u32,
    pub refill_tokens: u32,
    pub refill_interval_ms: u64,
}

impl BucketLimits {
    pub fn new(capacity: u32, refill_tokens: u32, refill_interval_ms: u64) -> Self {
        BucketLimits {
            capacity,
            refill_tokens,
            refill_interval_ms,
        }
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

/// Result of a single consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub allowed: bool,
    /// Whole tokens left after the attempt
    pub remaining: u64,
    /// Time until `cost` tokens are available again, 0 when allowed
    pub retry_after_ms: u64,
    /// Time until the bucket is full again
    pub reset_after_ms: u64,
}

/// Read-only view of a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSnapshot {
    pub tokens: f64,
    pub last_refill_at: Instant,
}

/// Concurrency-safe bucket storage.
///
/// `consume` must run lookup, refill, compare and mutate as one atomic unit
/// per key; two callers racing on the same key never both observe the
/// pre-mutation token count.
pub trait Store: Send + Sync + Debug {
    fn consume(
        &self,
        key: &str,
        cost: u32,
        limits: &BucketLimits,
        now: Instant,
    ) -> Result<Consumption, StoreError>;

    fn get(&self, key: &str) -> Option<BucketSnapshot>;

    /// Remove every bucket that has been idle for more than
    /// `retention_factor` refill intervals. Returns the number removed.
    fn sweep(&self, now: Instant, retention_factor: u32) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
