use redis::{AsyncCommands, Script};

use crate::{
    GcraError, GcraOutcome, GcraStore, LimitParameters, gcra::GCRA_LUA, redis::GcraRedisClient,
};

/// A [`GcraStore`] backed by Redis.
///
/// Every decision is one invocation of [`GCRA_LUA`]. Redis runs scripts
/// without interleaving other commands, which makes the read, the decision and
/// the write atomic for all clients sharing the server. The script is sent
/// with `EVALSHA` and loaded automatically when the server replies `NOSCRIPT`.
///
/// # Requirements
///
/// - **Redis version:** >= 6.2.0
/// - **Runtime:** Tokio or Smol (via `redis-tokio` or `redis-smol` features)
///
/// # Examples
///
/// ```ignore
/// use redis_gcra::{GcraRateLimiter, GcraRateLimiterOptions, LimitOverrides};
/// use redis_gcra::redis::{GcraRedisClient, RedisGcraStore};
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let store = RedisGcraStore::new(GcraRedisClient::from_client(client, 4).await?);
///
/// let limiter = GcraRateLimiter::new(store, GcraRateLimiterOptions {
///     key_prefix: Some("api".to_string()),
///     defaults: LimitOverrides::default().burst(100.0).rate(10.0).period_ms(1000.0),
/// })?;
///
/// let decision = limiter.limit("user_123", &LimitOverrides::default()).await?;
/// ```
#[derive(Clone, Debug)]
pub struct RedisGcraStore {
    client: GcraRedisClient,
    script: Script,
}

impl RedisGcraStore {
    /// Create a store on top of `client`.
    pub fn new(client: impl Into<GcraRedisClient>) -> Self {
        Self {
            client: client.into(),
            script: Script::new(GCRA_LUA),
        }
    }

    /// The underlying connection pool.
    pub fn client(&self) -> &GcraRedisClient {
        &self.client
    }

    /// SHA1 of the GCRA script as used with `EVALSHA`.
    pub fn script_hash(&self) -> &str {
        self.script.get_hash()
    }

    /// Load the script into the server's script cache ahead of the first request.
    ///
    /// Optional: the first invocation loads it on demand. Returns the script SHA1.
    pub async fn load_script(&self) -> Result<String, GcraError> {
        let mut connection_manager = self.client.get();
        let hash = self
            .script
            .prepare_invoke()
            .load_async(&mut connection_manager)
            .await?;

        tracing::debug!(hash = %hash, "redis.gcra.script_loaded");
        Ok(hash)
    }
}

impl GcraStore for RedisGcraStore {
    async fn perform_gcra(
        &self,
        key: &str,
        now_ms: u64,
        params: &LimitParameters,
    ) -> Result<GcraOutcome, GcraError> {
        let mut connection_manager = self.client.get();

        let (limited, remaining, retry_in_ms, reset_in_ms): (i64, u64, f64, f64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(params.burst())
            .arg(params.rate())
            .arg(params.period_ms())
            .arg(params.cost())
            .invoke_async(&mut connection_manager)
            .await?;

        Ok(GcraOutcome {
            limited: limited != 0,
            remaining,
            retry_in_ms,
            reset_in_ms,
        })
    } // end method perform_gcra

    async fn delete(&self, key: &str) -> Result<u64, GcraError> {
        let mut connection_manager = self.client.get();
        let removed: u64 = connection_manager.del(key).await?;

        Ok(removed)
    }
}
