use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// Key/value capability the response cache is built on.
///
/// `add_if_absent` must be atomic: of any number of concurrent callers using
/// the same key, at most one observes `true`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Returns the stored bytes. Never touches expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` only if nothing is stored under `key`. Returns whether
    /// the write happened.
    async fn add_if_absent(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<bool>;
}

/// Redis-backed store using `SET key value NX EX ttl`.
pub struct RedisResponseStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisResponseStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn open(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(client, key_prefix))
    }

    fn make_key(&self, idempotency_key: &str) -> String {
        if self.key_prefix.is_empty() {
            idempotency_key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, idempotency_key)
        }
    }

    /// Round-trips a PING, for startup checks.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseStore for RedisResponseStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = self.make_key(key);
        let value: Option<Vec<u8>> = conn.get(&key).await?;

        Ok(value)
    }

    async fn add_if_absent(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = self.make_key(key);
        let result: Option<String> = conn
            .set_options(
                &key,
                value,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl_seconds as usize)),
            )
            .await?;

        Ok(result.is_some())
    }
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Process-local store for single-node deployments and tests.
///
/// Expired entries are treated as absent and swept lazily on writes.
#[derive(Default)]
pub struct InMemoryResponseStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|v| v.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;

        Ok(entries
            .get(key)
            .filter(|v| v.expires_at > now)
            .map(|v| v.bytes.clone()))
    }

    async fn add_if_absent(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        entries.retain(|_, v| v.expires_at > now);
        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );

        Ok(true)
    }
}
