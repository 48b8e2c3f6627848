use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::store::Store;

/// Evicts buckets that have been idle for longer than the retention window.
///
/// Scheduling is left to the caller; `run_once` is a single pass.
#[derive(Debug, Clone)]
pub struct Sweeper {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retention_factor: u32,
}

impl Sweeper {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, retention_factor: u32) -> Self {
        Sweeper {
            store,
            clock,
            retention_factor: retention_factor.max(1),
        }
    }

    pub fn retention_factor(&self) -> u32 {
        self.retention_factor
    }

    /// Returns the number of evicted buckets.
    pub fn run_once(&self) -> usize {
        let removed = self.store.sweep(self.clock.now(), self.retention_factor);
        debug!(
            removed,
            remaining = self.store.len(),
            "Swept idle rate limit buckets"
        );
        removed
    }
}
