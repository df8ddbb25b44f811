#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod common;
pub use common::{
    LimitOverrides, LimitParameters, MAX_PARAMETER_VALUE, PeekDecision, RateLimitDecision,
};

mod error;
pub use error::*;

mod clock;
pub use clock::*;

pub mod gcra;
pub use gcra::{GCRA_LUA, GcraEvaluation, GcraOutcome, MAX_TTL_SECONDS};

mod store;
pub use store::*;

mod rate_limiter;
pub use rate_limiter::*;

pub mod local;
pub use local::LocalGcraStore;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
pub mod redis;

#[cfg(test)]
mod tests;
