pub mod cache;
pub mod envelope;
pub mod handler;
pub mod key;
pub mod storage;

pub use cache::{CacheStats, ResponseCache, CACHE_TTL_SECONDS};
pub use envelope::{render_json, IdempotentResponse, ResponseEnvelope, CANONICAL_CONTENT_TYPE};
pub use handler::{
    FallbackPolicy, IdempotencyInterceptor, IdempotencyMetrics, InterceptOutcome, MetricsSnapshot,
};
pub use key::{extract_key, is_intercepted_method, should_intercept, IdempotencyKey, IDEMPOTENCY_KEY_HEADER};
pub use storage::{InMemoryResponseStore, RedisResponseStore, ResponseStore};
