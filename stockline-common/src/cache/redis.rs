//! Distributed cache tier.
//!
//! Plain string values under a namespaced key with a server-side TTL, so
//! every process sharing the Redis instance sees the same entries and Redis
//! itself handles expiry.

use std::sync::Arc;
use std::time::Duration;

use redis::{Client as RedisClient, Commands, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FabricError, FabricResult};

/// Namespace prefix keeping fabric keys apart from other tenants.
const KEY_NAMESPACE: &str = "stockline:";

/// Redis-backed value store for the middle cache tier.
pub struct RedisCache {
    #[allow(dead_code)] // keep client alive to maintain the connection
    client: RedisClient,
    connection: Arc<Mutex<Connection>>,
}

impl RedisCache {
    pub fn connect(redis_url: &str) -> FabricResult<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| FabricError::Cache(format!("failed to create redis client: {}", e)))?;
        let connection = client
            .get_connection()
            .map_err(|e| FabricError::Cache(format!("failed to connect to redis: {}", e)))?;

        debug!("connected to redis at {}", redis_url);
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", KEY_NAMESPACE, key)
    }

    /// Fetch a value and its remaining TTL, when present and unexpired.
    pub async fn get_with_ttl(&self, key: &str) -> FabricResult<Option<(String, Duration)>> {
        let namespaced = Self::namespaced(key);
        let mut conn = self.connection.lock().await;

        let value: Option<String> = conn.get(&namespaced)?;
        let Some(value) = value else {
            return Ok(None);
        };

        // TTL -2 = missing, -1 = no expiry set; both degrade to a short grace
        let ttl_secs: i64 = conn.ttl(&namespaced)?;
        let remaining = if ttl_secs > 0 {
            Duration::from_secs(ttl_secs as u64)
        } else {
            Duration::from_secs(30)
        };
        Ok(Some((value, remaining)))
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> FabricResult<()> {
        let mut conn = self.connection.lock().await;
        let _: () = conn.set_ex(Self::namespaced(key), value, ttl.as_secs().max(1))?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> FabricResult<()> {
        let mut conn = self.connection.lock().await;
        let _: () = conn.del(Self::namespaced(key))?;
        Ok(())
    }

    /// Drop every key in the fabric namespace.
    pub async fn clear(&self) -> FabricResult<u64> {
        let mut conn = self.connection.lock().await;
        let keys: Vec<String> = conn.keys(format!("{}*", KEY_NAMESPACE))?;
        if keys.is_empty() {
            return Ok(0);
        }
        let count = keys.len() as u64;
        let _: () = conn.del(keys)?;
        Ok(count)
    }
}
