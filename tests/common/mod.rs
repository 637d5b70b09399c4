#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::response::Response;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use idempotent_responses::error::{IdempotencyError, Result};
use idempotent_responses::idempotency::{
    FallbackPolicy, IdempotencyInterceptor, InMemoryResponseStore, RedisResponseStore,
    ResponseCache, ResponseStore, IDEMPOTENCY_KEY_HEADER,
};

/// Store whose operations can be made to fail, backed by an in-memory store.
#[derive(Default)]
pub struct FailingStore {
    pub fail_get: bool,
    pub fail_add: bool,
    pub inner: InMemoryResponseStore,
    pub get_calls: AtomicU32,
    pub add_calls: AtomicU32,
}

impl FailingStore {
    pub fn failing_reads() -> Self {
        Self {
            fail_get: true,
            ..Default::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_add: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResponseStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get {
            return Err(IdempotencyError::CacheBackend(anyhow::anyhow!("connection refused")));
        }
        self.inner.get(key).await
    }

    async fn add_if_absent(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<bool> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_add {
            return Err(IdempotencyError::CacheBackend(anyhow::anyhow!("connection reset")));
        }
        self.inner.add_if_absent(key, value, ttl_seconds).await
    }
}

pub fn interceptor(store: Arc<dyn ResponseStore>, policy: FallbackPolicy) -> Arc<IdempotencyInterceptor> {
    Arc::new(IdempotencyInterceptor::new(ResponseCache::new(store), policy))
}

pub fn headers_with_key(key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(key).unwrap());
    headers
}

pub fn json_request(method: &str, uri: &str, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn setup_redis_store() -> RedisResponseStore {
    dotenvy::dotenv().ok();

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    RedisResponseStore::open(&redis_url, "idempotency-test").expect("Failed to create Redis client")
}
