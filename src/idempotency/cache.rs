use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::idempotency::envelope::ResponseEnvelope;
use crate::idempotency::key::IdempotencyKey;
use crate::idempotency::storage::ResponseStore;
use crate::observability::{get_metrics, LatencyTimer};

/// Lifetime of a committed response, in seconds.
pub const CACHE_TTL_SECONDS: u64 = 60 * 60;

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stored: AtomicU64,
    pub skipped: AtomicU64,
    pub errors: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn get_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn get_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn get_stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn get_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn get_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Response cache over an injected store.
///
/// Built once at startup and shared by reference; cloning shares the store
/// and the statistics.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn ResponseStore>,
    stats: Arc<CacheStats>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn ResponseStore>) -> Self {
        Self {
            store,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    /// Raw lookup.
    pub async fn get(&self, key: &IdempotencyKey) -> Result<Option<Vec<u8>>> {
        let timer = LatencyTimer::new();
        let result = self.store.get(key.as_str()).await;
        get_metrics().record_cache_operation("get", timer.elapsed_ms(), result.is_ok());

        match &result {
            Ok(Some(_)) => self.stats.record_hit(),
            Ok(None) => self.stats.record_miss(),
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key.fingerprint(), error = %e, "Idempotency cache get failed");
            }
        }

        result
    }

    /// Raw write-once store.
    pub async fn add_if_absent(
        &self,
        key: &IdempotencyKey,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<bool> {
        let timer = LatencyTimer::new();
        let result = self.store.add_if_absent(key.as_str(), value, ttl_seconds).await;
        get_metrics().record_cache_operation("add_if_absent", timer.elapsed_ms(), result.is_ok());

        match &result {
            Ok(true) => self.stats.record_stored(),
            Ok(false) => self.stats.record_skipped(),
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(key = %key.fingerprint(), error = %e, "Idempotency cache write failed");
            }
        }

        result
    }

    /// Looks up and decodes a committed envelope.
    pub async fn lookup(&self, key: &IdempotencyKey) -> Result<Option<ResponseEnvelope>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(ResponseEnvelope::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Commits an envelope under the fixed TTL. Returns false when another
    /// request already committed one for this key.
    pub async fn commit(&self, key: &IdempotencyKey, envelope: &ResponseEnvelope) -> Result<bool> {
        let bytes = envelope.to_bytes()?;
        let stored = self.add_if_absent(key, &bytes, CACHE_TTL_SECONDS).await?;
        get_metrics().record_commit(stored);

        if stored {
            tracing::debug!(key = %key.fingerprint(), status = envelope.status, "Committed idempotent response");
        } else {
            tracing::debug!(key = %key.fingerprint(), "Response already committed for key, write dropped");
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdempotencyError;
    use crate::idempotency::storage::{InMemoryResponseStore, MockResponseStore};
    use serde_json::json;

    fn envelope(id: i64) -> ResponseEnvelope {
        ResponseEnvelope {
            data: json!({ "id": id }),
            status: 201,
            template_name: None,
            headers: vec![("location".to_string(), format!("/payments/{}", id))],
            content_type: None,
        }
    }

    #[test]
    fn test_cache_stats() {
        let stats = CacheStats::new();

        assert_eq!(stats.get_hits(), 0);
        assert_eq!(stats.get_misses(), 0);
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert_eq!(stats.get_hits(), 2);
        assert_eq!(stats.get_misses(), 1);
        assert!((stats.hit_rate() - 0.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_commit_then_lookup() {
        let cache = ResponseCache::new(Arc::new(InMemoryResponseStore::new()));
        let key = IdempotencyKey::new("abc123").unwrap();

        assert!(cache.lookup(&key).await.unwrap().is_none());
        assert!(cache.commit(&key, &envelope(42)).await.unwrap());

        let found = cache.lookup(&key).await.unwrap().unwrap();
        assert_eq!(found, envelope(42));

        let stats = cache.stats();
        assert_eq!(stats.get_misses(), 1);
        assert_eq!(stats.get_hits(), 1);
        assert_eq!(stats.get_stored(), 1);
    }

    #[tokio::test]
    async fn test_first_commit_wins() {
        let cache = ResponseCache::new(Arc::new(InMemoryResponseStore::new()));
        let key = IdempotencyKey::new("abc123").unwrap();

        assert!(cache.commit(&key, &envelope(1)).await.unwrap());
        assert!(!cache.commit(&key, &envelope(2)).await.unwrap());

        let found = cache.lookup(&key).await.unwrap().unwrap();
        assert_eq!(found.data, json!({ "id": 1 }));
        assert_eq!(cache.stats().get_skipped(), 1);
    }

    #[tokio::test]
    async fn test_commit_uses_fixed_ttl() {
        let mut store = MockResponseStore::new();
        store
            .expect_add_if_absent()
            .withf(|key, _, ttl| key == "abc123" && *ttl == CACHE_TTL_SECONDS)
            .times(1)
            .returning(|_, _, _| Ok(true));

        let cache = ResponseCache::new(Arc::new(store));
        let key = IdempotencyKey::new("abc123").unwrap();
        assert!(cache.commit(&key, &envelope(42)).await.unwrap());
    }

    #[tokio::test]
    async fn test_backend_error_is_counted() {
        let mut store = MockResponseStore::new();
        store
            .expect_get()
            .returning(|_| Err(IdempotencyError::CacheBackend(anyhow::anyhow!("connection refused"))));

        let cache = ResponseCache::new(Arc::new(store));
        let key = IdempotencyKey::new("abc123").unwrap();

        let err = cache.lookup(&key).await.unwrap_err();
        assert_eq!(err.kind(), "cache_backend");
        assert_eq!(cache.stats().get_errors(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_serialization_error() {
        let store = Arc::new(InMemoryResponseStore::new());
        store.add_if_absent("abc123", b"{broken", 60).await.unwrap();

        let cache = ResponseCache::new(store);
        let key = IdempotencyKey::new("abc123").unwrap();

        let err = cache.lookup(&key).await.unwrap_err();
        assert_eq!(err.kind(), "serialization");
    }
}
