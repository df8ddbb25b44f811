//! Caller-facing entrypoint.
//!
//! [`GcraRateLimiter`] resolves per-call parameters against instance defaults,
//! namespaces the key, runs one atomic evaluation against its [`GcraStore`]
//! and shapes the reply.

use crate::{
    Clock, GcraError, GcraStore, LimitOverrides, LimitParameters, PeekDecision, RateLimitDecision,
    SystemClock,
    common::duration_from_ms,
};

/// Top-level configuration for [`GcraRateLimiter`].
///
/// Unset default fields fall back to `burst = 60`, `rate = 1`,
/// `period_ms = 1000`, `cost = 1`.
#[derive(Clone, Debug, Default)]
pub struct GcraRateLimiterOptions {
    /// Optional namespace for every key this limiter touches.
    ///
    /// Stored keys are `<prefix>/<key>`. `None` or an empty prefix leaves keys
    /// untouched.
    pub key_prefix: Option<String>,

    /// Instance-level parameter defaults. Validated once at construction.
    pub defaults: LimitOverrides,
}

/// GCRA rate limiter over a shared [`GcraStore`].
///
/// The limiter itself holds no per-key state and no locks; correctness under
/// concurrency comes entirely from the store's atomic evaluation. Every
/// operation is a single store round trip.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use redis_gcra::{GcraRateLimiter, GcraRateLimiterOptions, LimitOverrides, LocalGcraStore};
///
/// let limiter = GcraRateLimiter::new(
///     LocalGcraStore::new(),
///     GcraRateLimiterOptions {
///         key_prefix: Some("api".to_string()),
///         defaults: LimitOverrides::default().burst(2.0).rate(1.0).period_ms(60_000.0),
///     },
/// )
/// .unwrap();
///
/// futures::executor::block_on(async {
///     let overrides = LimitOverrides::default();
///
///     assert!(!limiter.limit("user_1", &overrides).await.unwrap().limited);
///     assert!(!limiter.limit("user_1", &overrides).await.unwrap().limited);
///
///     let third = limiter.limit("user_1", &overrides).await.unwrap();
///     assert!(third.limited);
///     assert!(third.retry_in.unwrap() > Duration::ZERO);
///
///     // Oversized requests can never succeed.
///     let huge = limiter.limit("user_1", &overrides.cost(3.0)).await.unwrap();
///     assert_eq!(huge.retry_in, None);
/// });
/// ```
#[derive(Debug)]
pub struct GcraRateLimiter<S, C = SystemClock> {
    store: S,
    clock: C,
    key_prefix: Option<String>,
    defaults: LimitParameters,
}

impl<S: GcraStore> GcraRateLimiter<S, SystemClock> {
    /// Create a limiter on the system clock.
    ///
    /// Fails with [`GcraError::InvalidParameter`] if a default is out of range.
    pub fn new(store: S, options: GcraRateLimiterOptions) -> Result<Self, GcraError> {
        Self::with_clock(store, options, SystemClock)
    }
}

impl<S: GcraStore, C: Clock> GcraRateLimiter<S, C> {
    /// Create a limiter that timestamps requests with `clock`.
    pub fn with_clock(
        store: S,
        options: GcraRateLimiterOptions,
        clock: C,
    ) -> Result<Self, GcraError> {
        let defaults = options.defaults.resolve(&LimitParameters::default())?;

        Ok(Self {
            store,
            clock,
            key_prefix: options.key_prefix.filter(|prefix| !prefix.is_empty()),
            defaults,
        })
    }

    /// The validated instance defaults.
    pub fn defaults(&self) -> &LimitParameters {
        &self.defaults
    }

    /// The key prefix, if any.
    pub fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn resolve_key(&self, key: &str) -> Result<String, GcraError> {
        if key.is_empty() {
            return Err(GcraError::MissingKey);
        }

        Ok(match &self.key_prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        })
    }

    /// Try to take `cost` tokens from `key`'s pool.
    ///
    /// A limited request takes nothing and leaves the stored state untouched.
    /// When the cost exceeds the burst the decision is limited with
    /// `retry_in == None`.
    ///
    /// Validation errors are returned before the store is contacted; store
    /// errors are returned as they are.
    pub async fn limit(
        &self,
        key: &str,
        overrides: &LimitOverrides,
    ) -> Result<RateLimitDecision, GcraError> {
        let params = overrides.resolve(&self.defaults)?;
        let key = self.resolve_key(key)?;
        let now_ms = self.clock.now_ms()?;

        let outcome = self.store.perform_gcra(&key, now_ms, &params).await?;

        let retry_in = if params.is_unsatisfiable() {
            tracing::debug!(
                key = %key,
                cost = params.cost(),
                burst = params.burst(),
                "gcra.unsatisfiable"
            );
            None
        } else {
            Some(duration_from_ms(outcome.retry_in_ms))
        };

        tracing::trace!(
            key = %key,
            limited = outcome.limited,
            remaining = outcome.remaining,
            "gcra.limit"
        );

        Ok(RateLimitDecision {
            limited: outcome.limited,
            remaining: outcome.remaining,
            retry_in,
            reset_in: duration_from_ms(outcome.reset_in_ms),
        })
    } // end method limit

    /// Inspect `key`'s pool without taking anything.
    ///
    /// Any `cost` in `overrides` is ignored; the evaluation always runs with
    /// a cost of zero, which never writes.
    pub async fn peek(
        &self,
        key: &str,
        overrides: &LimitOverrides,
    ) -> Result<PeekDecision, GcraError> {
        let params = overrides.cost(0f64).resolve(&self.defaults)?;
        let key = self.resolve_key(key)?;
        let now_ms = self.clock.now_ms()?;

        let outcome = self.store.perform_gcra(&key, now_ms, &params).await?;

        Ok(PeekDecision {
            limited: outcome.limited,
            remaining: outcome.remaining,
            reset_in: duration_from_ms(outcome.reset_in_ms),
        })
    }

    /// Drop `key`'s state, refilling its pool.
    ///
    /// Returns `true` if there was state to drop, `false` if the pool was
    /// already full.
    pub async fn reset(&self, key: &str) -> Result<bool, GcraError> {
        let key = self.resolve_key(key)?;
        let removed = self.store.delete(&key).await?;

        tracing::debug!(key = %key, removed, "gcra.reset");
        Ok(removed > 0)
    }
}
