use std::convert::Infallible;
use thiserror::Error;

/// Result type for idempotency infrastructure operations.
pub type Result<T, E = IdempotencyError> = std::result::Result<T, E>;

/// Errors raised while intercepting a request.
///
/// The first three variants are infrastructure failures and are resolved by the
/// configured fallback policy. `HandlerExecution` carries the wrapped handler's
/// own error and is always propagated unchanged.
#[derive(Debug, Error)]
pub enum IdempotencyError<E = Infallible> {
    #[error("Failed to extract idempotency key: {0}")]
    KeyExtraction(String),

    #[error("Cache backend error: {0}")]
    CacheBackend(anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Handler error: {0}")]
    HandlerExecution(E),
}

impl IdempotencyError {
    /// Wraps a store-level failure.
    pub fn backend<T>(err: T) -> Self
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        IdempotencyError::CacheBackend(anyhow::Error::new(err))
    }

    /// Re-types an infrastructure error so it can sit next to a handler error.
    pub fn with_handler_error<E>(self) -> IdempotencyError<E> {
        match self {
            IdempotencyError::KeyExtraction(msg) => IdempotencyError::KeyExtraction(msg),
            IdempotencyError::CacheBackend(err) => IdempotencyError::CacheBackend(err),
            IdempotencyError::Serialization(err) => IdempotencyError::Serialization(err),
            IdempotencyError::HandlerExecution(never) => match never {},
        }
    }
}

impl<E> IdempotencyError<E> {
    /// True for failures of the caching layer rather than the handler.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, IdempotencyError::HandlerExecution(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IdempotencyError::KeyExtraction(_) => "key_extraction",
            IdempotencyError::CacheBackend(_) => "cache_backend",
            IdempotencyError::Serialization(_) => "serialization",
            IdempotencyError::HandlerExecution(_) => "handler_execution",
        }
    }

    /// Returns the handler's error, if this is one.
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            IdempotencyError::HandlerExecution(err) => Some(err),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for IdempotencyError {
    fn from(err: redis::RedisError) -> Self {
        IdempotencyError::backend(err)
    }
}
