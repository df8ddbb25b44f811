use std::time::{SystemTime, UNIX_EPOCH};

use crate::GcraError;

/// Source of the request timestamp passed to the engine.
///
/// All callers sharing a key should use clocks that agree closely, since the
/// stored TAT is expressed in the callers' time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> Result<u64, GcraError>;
}

/// Wall clock in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Result<u64, GcraError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|err| GcraError::Clock(err.to_string()))
    }
}

#[cfg(any(test, feature = "testing"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "testing"))]
mod manual {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    };
    use std::time::Duration;

    use crate::{Clock, GcraError};

    /// A clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to a limiter
    /// and keep another to drive it.
    #[derive(Debug, Clone, Default)]
    pub struct ManualClock {
        now_ms: Arc<AtomicU64>,
        fail_next: Arc<AtomicBool>,
    }

    impl ManualClock {
        /// Create a clock reading `now_ms`.
        pub fn new(now_ms: u64) -> Self {
            Self {
                now_ms: Arc::new(AtomicU64::new(now_ms)),
                fail_next: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            self.now_ms
                .fetch_add(by.as_millis() as u64, Ordering::Relaxed);
        }

        /// Jump to an absolute time.
        pub fn set_ms(&self, now_ms: u64) {
            self.now_ms.store(now_ms, Ordering::Relaxed);
        }

        /// Make the next `now_ms` call return an error.
        pub fn fail_next_call(&self) {
            self.fail_next.store(true, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> Result<u64, GcraError> {
            if self.fail_next.swap(false, Ordering::Relaxed) {
                return Err(GcraError::Clock("manual clock failure".to_string()));
            }
            Ok(self.now_ms.load(Ordering::Relaxed))
        }
    }
}
