use std::{future::Future, sync::Arc};

use crate::{GcraError, GcraOutcome, LimitParameters};

/// Shared state behind a [`GcraRateLimiter`](crate::GcraRateLimiter).
///
/// Implementations own the per-key TAT. The only way to change it is
/// [`perform_gcra`](GcraStore::perform_gcra), which must read the TAT, run
/// [`evaluate`](crate::gcra::evaluate) and persist the result as one
/// indivisible step with respect to every other call on the same key. A
/// get-then-set pair does not qualify: two racing callers would both see the
/// same tokens.
///
/// Each method is one round trip. Implementations do not retry.
pub trait GcraStore: Send + Sync {
    /// Atomically evaluate and apply one GCRA request for `key`.
    fn perform_gcra(
        &self,
        key: &str,
        now_ms: u64,
        params: &LimitParameters,
    ) -> impl Future<Output = Result<GcraOutcome, GcraError>> + Send;

    /// Remove the stored state for `key`, returning how many entries were removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<u64, GcraError>> + Send;
}

impl<S: GcraStore> GcraStore for Arc<S> {
    fn perform_gcra(
        &self,
        key: &str,
        now_ms: u64,
        params: &LimitParameters,
    ) -> impl Future<Output = Result<GcraOutcome, GcraError>> + Send {
        (**self).perform_gcra(key, now_ms, params)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<u64, GcraError>> + Send {
        (**self).delete(key)
    }
}
