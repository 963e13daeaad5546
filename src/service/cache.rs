//! Key-value store for markers, status and the latest briefing

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tokio::time::Instant;

// Environment variable names
const ENV_REDIS_HOST: &str = "RADAR_REDIS_HOST";
const ENV_REDIS_PORT: &str = "RADAR_REDIS_PORT";
const ENV_REDIS_PASSWORD: &str = "RADAR_REDIS_PASSWORD";
const ENV_REDIS_DB: &str = "RADAR_REDIS_DB";

// Default values
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: &str = "6379";
const DEFAULT_REDIS_DB: &str = "0";

const SCAN_BATCH: usize = 100;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Open a Redis client and verify the connection
///
/// Configuration via environment variables:
/// - `RADAR_REDIS_HOST` - Redis host (default: 127.0.0.1)
/// - `RADAR_REDIS_PORT` - Redis port (default: 6379)
/// - `RADAR_REDIS_PASSWORD` - Redis password (default: none)
/// - `RADAR_REDIS_DB` - Redis database number (default: 0)
pub async fn connect_redis() -> Result<Client, CacheError> {
    let host = env::var(ENV_REDIS_HOST).unwrap_or_else(|_| DEFAULT_REDIS_HOST.to_string());
    let port = env::var(ENV_REDIS_PORT).unwrap_or_else(|_| DEFAULT_REDIS_PORT.to_string());
    let password = env::var(ENV_REDIS_PASSWORD).ok();
    let db = env::var(ENV_REDIS_DB).unwrap_or_else(|_| DEFAULT_REDIS_DB.to_string());

    // Build Redis URL: redis://[password@]host:port/db
    let redis_url = match password {
        Some(pwd) if !pwd.is_empty() => format!("redis://:{}@{}:{}/{}", pwd, host, port, db),
        _ => format!("redis://{}:{}/{}", host, port, db),
    };

    tracing::debug!(host = %host, port = %port, db = %db, "Connecting to Redis");

    let client = Client::open(redis_url)?;

    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    tracing::info!(host = %host, port = %port, "Redis connection established");

    Ok(client)
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Set only when the key is absent, with an expiry. Returns true when
    /// this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Returns true when the key existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Read a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match store.get(key).await? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Write a JSON value without expiry
pub async fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), CacheError> {
    let json = serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    store.set(key, &json).await
}

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(key, value).await?;
        tracing::debug!(key = %key, "Stored value");
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.exists(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pattern = format!("{}*", prefix);
        let mut deleted = 0usize;

        let mut cursor = 0u64;
        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: usize = conn.del(&keys).await?;
                deleted += removed;
            }

            if new_cursor == 0 {
                break;
            }
            cursor = new_cursor;
        }

        tracing::debug!(prefix = %prefix, deleted = deleted, "Deleted keys by prefix");
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process store with expiry, for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(entry: &(String, Option<Instant>), now: Instant) -> bool {
        entry.1.is_none_or(|expires| expires > now)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| Self::live(e, now))
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| Self::live(e, now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Some(now + ttl)));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let removed = self.entries.lock().await.remove(key);
        Ok(removed.is_some_and(|e| Self::live(&e, now)))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
