use dashmap::DashMap;
use std::time::Instant;

use super::{Bucket, BucketLimits, BucketSnapshot, Consumption, Store};
use crate::error::StoreError;

/// In-process bucket store backed by DashMap.
///
/// Each key lives in a shard guarded by its own lock, so a consume only
/// contends with callers whose keys hash to the same shard, and a sweep
/// locks one shard at a time.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    buckets: DashMap<String, Bucket>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }
}

impl Store for InMemoryStore {
    fn consume(
        &self,
        key: &str,
        cost: u32,
        limits: &BucketLimits,
        now: Instant,
    ) -> Result<Consumption, StoreError> {
        if cost > limits.capacity {
            return Err(StoreError::CostExceedsCapacity {
                cost,
                capacity: limits.capacity,
            });
        }
        if limits.refill_tokens == 0 || limits.refill_interval_ms == 0 {
            return Err(StoreError::Internal(format!(
                "bucket {key} has a zero refill rate"
            )));
        }

        // The guard keeps the shard write-locked until the refill and the
        // take below are done.
        let mut bucket = match self.buckets.get_mut(key) {
            Some(bucket) => bucket,
            None => self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(limits, now)),
        };
        Ok(bucket.try_consume(cost, limits, now))
    }

    fn get(&self, key: &str) -> Option<BucketSnapshot> {
        self.buckets.get(key).map(|bucket| bucket.snapshot())
    }

    fn sweep(&self, now: Instant, retention_factor: u32) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let keep = !bucket.is_idle(now, retention_factor);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}
