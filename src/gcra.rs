//! The Generic Cell Rate Algorithm.
//!
//! A key's whole state is one number, its theoretical arrival time (TAT): the
//! moment the pool would be full again given everything admitted so far. A
//! missing TAT and a TAT in the past both mean "pool full".
//!
//! [`evaluate`] is the in-process form of the algorithm and [`GCRA_LUA`] is
//! the same algorithm as a Redis script. Both must stay in lockstep.

use crate::LimitParameters;

/// Upper bound for the expiry of a stored TAT, in seconds.
///
/// Redis refuses `EX` values whose millisecond expiry overflows an `i64`, and
/// Lua renders large numbers in exponent form, so longer expiries are capped
/// here (about 285,000 years). Only the key's lifetime is capped; the stored
/// TAT is exact.
pub const MAX_TTL_SECONDS: u64 = 9_007_199_254_740;

/// Time below which two instants are considered equal, in milliseconds.
///
/// TATs accumulate `period / rate` steps, which are rarely exact in binary.
/// Without a tolerance a pool that should hold `n` tokens can come out as
/// `n - 0.0000001` and floor to `n - 1`. Capped at a quarter of the emission
/// interval so it never spans a whole token.
fn slack_ms(emission_interval_ms: f64) -> f64 {
    (emission_interval_ms / 4f64).min(0.001)
}

/// Redis Lua implementation of [`evaluate`].
///
/// `KEYS[1]` is the rate limit key and `ARGV` is
/// `now_ms, burst, rate, period_ms, cost`. The reply is
/// `{limited (0|1), remaining, retry_in_ms, reset_in_ms}` with the two
/// durations sent as strings so fractional milliseconds survive the reply
/// conversion.
///
/// Admitted requests with a non-zero cost store the new TAT with an expiry of
/// `ceil((new_tat - now) / 1000)` seconds, capped at [`MAX_TTL_SECONDS`].
/// Rejected and zero-cost requests never write. The TAT and both durations
/// are formatted with `%.17g`, which round-trips an `f64` exactly.
pub const GCRA_LUA: &str = r#"
local MAX_TTL_SECONDS = 9007199254740
local key = KEYS[1]

local now = tonumber(ARGV[1])
local burst = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local period = tonumber(ARGV[4])
local cost = tonumber(ARGV[5])

local emission_interval = period / rate
local delay_variation_tolerance = emission_interval * burst
local slack = math.min(0.001, emission_interval / 4)

local function whole_tokens(available)
    local tokens = math.floor((available + slack) / emission_interval)
    if tokens < 0 then
        return 0
    end
    return tokens
end

local tat = tonumber(redis.call("GET", key))
if not tat or tat < now then
    tat = now
end

local increment = emission_interval * cost
local new_tat = tat + increment
local allow_at = new_tat - delay_variation_tolerance

if allow_at - now > slack then
    local remaining = whole_tokens(delay_variation_tolerance - (tat - now))
    return {
        1,
        remaining,
        string.format("%.17g", allow_at - now),
        string.format("%.17g", math.max(tat - now, 0)),
    }
end

if increment > 0 and new_tat > now then
    local ttl_seconds = math.min(math.ceil((new_tat - now) / 1000), MAX_TTL_SECONDS)
    redis.call("SET", key, string.format("%.17g", new_tat), "EX", ttl_seconds)
end

local remaining = whole_tokens(delay_variation_tolerance - (new_tat - now))
return {0, remaining, "0", string.format("%.17g", math.max(new_tat - now, 0))}
"#;

/// Raw result of one GCRA evaluation, as returned by a [`GcraStore`](crate::GcraStore).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GcraOutcome {
    /// Whether the request was rejected.
    pub limited: bool,
    /// Whole tokens left in the pool.
    pub remaining: u64,
    /// Milliseconds until this request would be admitted; `0` when admitted.
    pub retry_in_ms: f64,
    /// Milliseconds until the pool is full again.
    pub reset_in_ms: f64,
}

/// An evaluation plus the state transition it implies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GcraEvaluation {
    /// The reply handed back to the caller.
    pub outcome: GcraOutcome,
    /// The TAT to persist, or `None` when the stored state must stay as it is.
    pub next_tat: Option<f64>,
    now_ms: f64,
}

impl GcraEvaluation {
    /// Expiry for the persisted TAT, in whole seconds, rounded up.
    ///
    /// `None` when nothing is persisted.
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.next_tat
            .map(|tat| {
                ((tat - self.now_ms) / 1000f64)
                    .ceil()
                    .clamp(0f64, MAX_TTL_SECONDS as f64) as u64
            })
    }
}

fn whole_tokens(available_ms: f64, emission_interval_ms: f64) -> u64 {
    let tokens = ((available_ms + slack_ms(emission_interval_ms)) / emission_interval_ms).floor();
    if tokens > 0f64 { tokens as u64 } else { 0 }
}

/// Decide admission for one request.
///
/// A request is admitted when its `allow_at` is not later than `now` by more
/// than a microsecond-scale tolerance, which absorbs rounding in the TAT.
///
/// `stored_tat` is the TAT currently persisted for the key, if any. The
/// caller is responsible for running this and persisting
/// [`GcraEvaluation::next_tat`] as a single atomic step.
pub fn evaluate(now_ms: u64, params: &LimitParameters, stored_tat: Option<f64>) -> GcraEvaluation {
    let now = now_ms as f64;
    let emission_interval = params.emission_interval_ms();
    let delay_variation_tolerance = params.delay_variation_tolerance_ms();

    let tat = match stored_tat {
        Some(tat) if tat > now => tat,
        _ => now,
    };

    let increment = emission_interval * params.cost();
    let new_tat = tat + increment;
    let allow_at = new_tat - delay_variation_tolerance;

    if allow_at - now > slack_ms(emission_interval) {
        return GcraEvaluation {
            outcome: GcraOutcome {
                limited: true,
                remaining: whole_tokens(delay_variation_tolerance - (tat - now), emission_interval),
                retry_in_ms: allow_at - now,
                reset_in_ms: (tat - now).max(0f64),
            },
            next_tat: None,
            now_ms: now,
        };
    }

    GcraEvaluation {
        outcome: GcraOutcome {
            limited: false,
            remaining: whole_tokens(
                delay_variation_tolerance - (new_tat - now),
                emission_interval,
            ),
            retry_in_ms: 0f64,
            reset_in_ms: (new_tat - now).max(0f64),
        },
        next_tat: (increment > 0f64 && new_tat > now).then_some(new_tat),
        now_ms: now,
    }
}
