use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    Clock, GcraError, GcraOutcome, GcraStore, LimitParameters, SystemClock, gcra::evaluate,
};

#[derive(Clone, Copy, Debug)]
struct StoredTat {
    tat: f64,
    expires_at_ms: u64,
}

impl StoredTat {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// In-process [`GcraStore`] backed by a [`DashMap`].
///
/// Each evaluation runs while holding the map's entry lock for the key, so
/// concurrent callers in the same process are serialized per key exactly as
/// Redis serializes script executions. State is not shared across processes.
///
/// Entries expire the way Redis keys do: after `ceil((tat - now) / 1000)`
/// seconds. Expired entries read as absent; they are physically removed by
/// [`cleanup`](Self::cleanup), which can run on a background thread via
/// [`run_cleanup_loop`](Self::run_cleanup_loop).
///
/// Clones share the same state.
///
/// # Examples
///
/// ```
/// use redis_gcra::{GcraRateLimiter, GcraRateLimiterOptions, LimitOverrides, LocalGcraStore};
///
/// let limiter = GcraRateLimiter::new(
///     LocalGcraStore::new(),
///     GcraRateLimiterOptions::default(),
/// )
/// .unwrap();
///
/// let decision = futures::executor::block_on(
///     limiter.limit("user_123", &LimitOverrides::default()),
/// )
/// .unwrap();
///
/// assert!(!decision.limited);
/// assert_eq!(decision.remaining, 59);
/// ```
#[derive(Clone, Debug)]
pub struct LocalGcraStore<C = SystemClock> {
    entries: Arc<DashMap<String, StoredTat>>,
    clock: C,
    cleanup_stop: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl LocalGcraStore<SystemClock> {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for LocalGcraStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> LocalGcraStore<C> {
    /// Create an empty store whose expiry checks use `clock`.
    ///
    /// Use the same clock as the limiter, otherwise `reset` and `cleanup` may
    /// disagree with `limit` about which entries are expired.
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            cleanup_stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub fn exists(&self, key: &str) -> Result<bool, GcraError> {
        let now_ms = self.clock.now_ms()?;
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now_ms)))
    }

    /// Number of physically stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn cleanup(&self) -> Result<usize, GcraError> {
        let now_ms = self.clock.now_ms()?;
        Ok(remove_expired(&self.entries, now_ms))
    }
}

fn remove_expired(entries: &DashMap<String, StoredTat>, now_ms: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now_ms));
    before.saturating_sub(entries.len())
}

impl<C: Clock + Clone + 'static> LocalGcraStore<C> {
    /// Start a background thread that calls [`cleanup`](Self::cleanup) every `interval`.
    ///
    /// Calling this while a loop is already running does nothing. The thread
    /// exits on [`stop_cleanup_loop`](Self::stop_cleanup_loop) or once every
    /// clone of the store has been dropped.
    pub fn run_cleanup_loop(&self, interval: Duration) {
        let mut guard = match self.cleanup_stop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        *guard = Some(stop.clone());

        let entries: Weak<DashMap<String, StoredTat>> = Arc::downgrade(&self.entries);
        let clock = self.clock.clone();

        thread::spawn(move || {
            loop {
                thread::sleep(interval);

                if stop.load(Ordering::Relaxed) {
                    break;
                }

                let Some(entries) = entries.upgrade() else {
                    break;
                };

                match clock.now_ms() {
                    Ok(now_ms) => {
                        let removed = remove_expired(&entries, now_ms);
                        tracing::trace!(removed, "local.cleanup");
                    }
                    Err(err) => {
                        tracing::error!(error = ?err, "Failed to read clock for local cleanup");
                    }
                }
            }
        });
    }

    /// Stop the background cleanup loop, if one is running.
    pub fn stop_cleanup_loop(&self) {
        let mut guard = match self.cleanup_stop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(stop) = guard.take() {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

impl<C: Clock> GcraStore for LocalGcraStore<C> {
    async fn perform_gcra(
        &self,
        key: &str,
        now_ms: u64,
        params: &LimitParameters,
    ) -> Result<GcraOutcome, GcraError> {
        // Read-only requests on unknown keys must not allocate an entry.
        if params.cost() == 0f64 {
            let stored = self
                .entries
                .get(key)
                .filter(|entry| entry.is_live(now_ms))
                .map(|entry| entry.tat);
            return Ok(evaluate(now_ms, params, stored).outcome);
        }

        let evaluation = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                let stored = current.is_live(now_ms).then_some(current.tat);
                let evaluation = evaluate(now_ms, params, stored);

                if let (Some(tat), Some(ttl)) = (evaluation.next_tat, evaluation.ttl_seconds()) {
                    occupied.insert(StoredTat {
                        tat,
                        expires_at_ms: now_ms.saturating_add(ttl.saturating_mul(1000)),
                    });
                } else if stored.is_none() {
                    occupied.remove();
                }

                evaluation
            }
            Entry::Vacant(vacant) => {
                let evaluation = evaluate(now_ms, params, None);

                if let (Some(tat), Some(ttl)) = (evaluation.next_tat, evaluation.ttl_seconds()) {
                    vacant.insert(StoredTat {
                        tat,
                        expires_at_ms: now_ms.saturating_add(ttl.saturating_mul(1000)),
                    });
                }

                evaluation
            }
        };

        Ok(evaluation.outcome)
    }

    async fn delete(&self, key: &str) -> Result<u64, GcraError> {
        let now_ms = self.clock.now_ms()?;

        match self.entries.remove(key) {
            Some((_, entry)) if entry.is_live(now_ms) => Ok(1),
            _ => Ok(0),
        }
    }
}
