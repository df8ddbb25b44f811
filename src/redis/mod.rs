//! Redis-backed GCRA store.
//!
//! [`RedisGcraStore`] runs the whole decision inside one Lua script, so every
//! process talking to the same Redis server shares one budget per key.
//!
//! # Data Model
//!
//! One string key per rate limit key, holding the TAT in milliseconds. The key
//! expires when the pool would be full again, so idle keys cost nothing.

mod common;
pub use common::*;

mod redis_gcra_store;
pub use redis_gcra_store::*;
