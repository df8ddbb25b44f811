use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::GcraError;

/// A round-robin pool of [`redis::aio::ConnectionManager`]s.
///
/// Each manager multiplexes requests over one connection and reconnects on
/// its own. Several managers spread load when many tasks share one limiter.
pub struct GcraRedisClient {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: AtomicUsize,
}

impl GcraRedisClient {
    /// Create a client with a single connection manager.
    pub async fn default_from_client(client: Client) -> Result<Self, GcraError> {
        Self::from_client(client, 1).await
    }

    /// Create a client with `connection_count` connection managers.
    pub async fn from_client(client: Client, connection_count: usize) -> Result<Self, GcraError> {
        Self::from_client_with_config(client, connection_count, ConnectionManagerConfig::new())
            .await
    }

    /// Create a client with `connection_count` connection managers built from `config`.
    ///
    /// Use the config's response timeout to put a deadline on each round trip.
    /// A timed out script either ran completely on the server or not at all.
    pub async fn from_client_with_config(
        client: Client,
        connection_count: usize,
        config: ConnectionManagerConfig,
    ) -> Result<Self, GcraError> {
        if connection_count == 0 {
            return Err(GcraError::InvalidConnectionCount(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            connection_managers.push(
                client
                    .get_connection_manager_with_config(config.clone())
                    .await?,
            );
        }

        Ok(Self {
            connection_managers: Arc::new(connection_managers),
            track_index: AtomicUsize::new(0),
        })
    }

    /// Number of pooled connection managers.
    pub fn connection_count(&self) -> usize {
        self.connection_managers.len()
    }

    /// Get the next [`redis::aio::ConnectionManager`] in round-robin order.
    pub(crate) fn get(&self) -> ConnectionManager {
        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    } // end method get
} // end impl GcraRedisClient

impl std::fmt::Debug for GcraRedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcraRedisClient")
            .field("connection_count", &self.connection_managers.len())
            .field("track_index", &self.track_index)
            .finish_non_exhaustive()
    }
}

impl Clone for GcraRedisClient {
    fn clone(&self) -> Self {
        Self {
            connection_managers: self.connection_managers.clone(),
            track_index: AtomicUsize::new(0),
        }
    }
}

impl From<ConnectionManager> for GcraRedisClient {
    fn from(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_managers: Arc::new(vec![connection_manager]),
            track_index: AtomicUsize::new(0),
        }
    }
}
