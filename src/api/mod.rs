pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod requests;
pub mod responses;
pub mod routes;

pub use extractors::Idempotent;
pub use middleware::{idempotency_middleware, BodyBufferError, BufferedResponse, IdempotencyLayerState};
pub use responses::{ApiError, JsonResponse};
pub use routes::{create_router, AppState};
