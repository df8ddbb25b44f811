//! In-process GCRA store.
//!
//! [`LocalGcraStore`] keeps one TAT per key in a [`DashMap`](dashmap::DashMap)
//! and applies the same algorithm as the Redis script, with the same expiry
//! rules.
//!
//! # Key Characteristics
//!
//! - **Thread-safe:** evaluations on one key are serialized by the map's entry lock
//! - **No external dependencies:** no network or database required
//! - **Process-scoped:** state is not shared across processes
//!
//! # When to Use
//!
//! ✅ **Use the local store when:**
//! - A single process owns the limit
//! - Tests need the full limiter without a Redis server
//!
//! ❌ **Use the Redis store instead when:**
//! - Multiple application instances must share one budget
//! - Limits must survive process restarts

mod local_gcra_store;
pub use local_gcra_store::*;
