/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum GcraError {
    /// A limit parameter failed numeric validation.
    #[error("{name} {message}")]
    InvalidParameter {
        /// Name of the offending field (`burst`, `rate`, `period`, `cost`).
        name: &'static str,
        /// What is wrong with the value.
        message: String,
    },

    /// The rate limit key was empty.
    #[error("key is required")]
    MissingKey,

    /// A Redis client was requested with zero connections.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[error("invalid redis client connection count: {0}")]
    InvalidConnectionCount(String),

    /// The clock could not produce a timestamp.
    #[error("clock error: {0}")]
    Clock(String),

    /// Redis error.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

impl GcraError {
    /// Returns `true` for errors raised by argument validation, before any
    /// store round trip took place.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            GcraError::InvalidParameter { .. } | GcraError::MissingKey
        )
    }
}
