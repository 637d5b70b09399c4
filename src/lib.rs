pub mod api;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod observability;

pub use error::{IdempotencyError, Result};
pub use idempotency::{
    FallbackPolicy, IdempotencyInterceptor, IdempotentResponse, ResponseCache, ResponseEnvelope,
    ResponseStore,
};
