//! Time source for bucket refills.
//!
//! The engine only ever asks for monotonic instants, so wall-clock jumps
//! cannot produce negative elapsed time.

use std::fmt::Debug;
use std::time::Instant;

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use super::Clock;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// Clock whose time only moves when a test says so.
    ///
    /// Clones share the same underlying instant.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current_time: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        pub fn new(start: Instant) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(start)),
            }
        }

        pub fn advance(&self, duration: Duration) {
            let mut time = self
                .current_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *time += duration;
        }

        pub fn set(&self, instant: Instant) {
            let mut time = self
                .current_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *time = instant;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self
                .current_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }
}
