use std::time::Duration;

use crate::GcraError;

/// Exclusive upper bound for every limit parameter (`2^53 - 1`).
///
/// Values at or above this can no longer be represented exactly as `f64`
/// integers, so time arithmetic on them would silently lose precision.
pub const MAX_PARAMETER_VALUE: f64 = 9_007_199_254_740_991f64;

pub(crate) fn validate_number(
    value: f64,
    name: &'static str,
    min: f64,
    max: f64,
) -> Result<f64, GcraError> {
    if !value.is_finite() {
        return Err(GcraError::InvalidParameter {
            name,
            message: "must be finite".to_string(),
        });
    }
    if value < min {
        return Err(GcraError::InvalidParameter {
            name,
            message: format!("must be at least {min}"),
        });
    }
    if value >= max {
        return Err(GcraError::InvalidParameter {
            name,
            message: format!("must be less than {max}"),
        });
    }

    Ok(value)
}

/// A fully resolved and validated set of limit parameters.
///
/// - `burst`: maximum number of tokens in the pool (>= 1)
/// - `rate`: tokens regenerated per `period_ms` (>= 1)
/// - `period_ms`: regeneration window length in milliseconds (>= 1)
/// - `cost`: tokens requested by one call (>= 0)
///
/// The [`Default`] value is `burst = 60, rate = 1, period_ms = 1000, cost = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimitParameters {
    burst: f64,
    rate: f64,
    period_ms: f64,
    cost: f64,
}

impl LimitParameters {
    /// Validate and build a parameter set.
    pub fn new(burst: f64, rate: f64, period_ms: f64, cost: f64) -> Result<Self, GcraError> {
        Ok(Self {
            burst: validate_number(burst, "burst", 1f64, MAX_PARAMETER_VALUE)?,
            rate: validate_number(rate, "rate", 1f64, MAX_PARAMETER_VALUE)?,
            period_ms: validate_number(period_ms, "period", 1f64, MAX_PARAMETER_VALUE)?,
            cost: validate_number(cost, "cost", 0f64, MAX_PARAMETER_VALUE)?,
        })
    }

    /// Maximum pool size in tokens.
    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Tokens regenerated per period.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Regeneration window in milliseconds.
    pub fn period_ms(&self) -> f64 {
        self.period_ms
    }

    /// Tokens requested by a call.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Time cost of a single token, in milliseconds.
    pub fn emission_interval_ms(&self) -> f64 {
        self.period_ms / self.rate
    }

    /// Time window equivalent of a full pool, in milliseconds.
    pub fn delay_variation_tolerance_ms(&self) -> f64 {
        self.emission_interval_ms() * self.burst
    }

    /// `true` when the cost can never fit in the pool, no matter how long the caller waits.
    pub fn is_unsatisfiable(&self) -> bool {
        self.cost > self.burst
    }
}

impl Default for LimitParameters {
    fn default() -> Self {
        Self {
            burst: 60f64,
            rate: 1f64,
            period_ms: 1000f64,
            cost: 1f64,
        }
    }
}

/// Per-call (or per-instance) overrides of [`LimitParameters`].
///
/// Every field is individually optional; unset fields fall back to the
/// defaults they are resolved against.
///
/// ```
/// use redis_gcra::LimitOverrides;
///
/// let overrides = LimitOverrides::default().burst(10.0).cost(2.0);
/// assert_eq!(overrides.burst, Some(10.0));
/// assert_eq!(overrides.rate, None);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LimitOverrides {
    /// Maximum pool size override.
    pub burst: Option<f64>,
    /// Regeneration rate override.
    pub rate: Option<f64>,
    /// Regeneration period override (milliseconds).
    pub period_ms: Option<f64>,
    /// Cost override.
    pub cost: Option<f64>,
}

impl LimitOverrides {
    /// Builder-style: set burst.
    pub fn burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Builder-style: set rate.
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Builder-style: set period in milliseconds.
    pub fn period_ms(mut self, period_ms: f64) -> Self {
        self.period_ms = Some(period_ms);
        self
    }

    /// Builder-style: set cost.
    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Merge these overrides over `defaults` and validate the result.
    pub fn resolve(&self, defaults: &LimitParameters) -> Result<LimitParameters, GcraError> {
        LimitParameters::new(
            self.burst.unwrap_or(defaults.burst),
            self.rate.unwrap_or(defaults.rate),
            self.period_ms.unwrap_or(defaults.period_ms),
            self.cost.unwrap_or(defaults.cost),
        )
    }
}

/// Outcome of [`GcraRateLimiter::limit`](crate::GcraRateLimiter::limit).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request was rejected. Rejected requests consume nothing.
    pub limited: bool,
    /// Tokens left in the pool. When `limited`, this is the pool as it was
    /// before the request, since nothing was taken.
    pub remaining: u64,
    /// How long to wait before this exact request would be admitted.
    ///
    /// `Some(Duration::ZERO)` when admitted. `None` when the cost is larger
    /// than the burst, in which case waiting never helps.
    pub retry_in: Option<Duration>,
    /// Time until the pool is back to `burst` tokens. Zero when already full.
    pub reset_in: Duration,
}

/// Outcome of [`GcraRateLimiter::peek`](crate::GcraRateLimiter::peek).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeekDecision {
    /// `true` only in the degenerate case where the pool is over-committed
    /// for the parameters given to `peek`.
    pub limited: bool,
    /// Tokens currently in the pool.
    pub remaining: u64,
    /// Time until the pool is back to `burst` tokens. Zero when already full.
    pub reset_in: Duration,
}

pub(crate) fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0f64 {
        Duration::try_from_secs_f64(ms / 1000f64).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}
