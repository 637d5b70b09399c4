use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use crate::error::IdempotencyError;
use crate::idempotency::{IdempotencyInterceptor, IdempotentResponse};

/// Per-handler idempotency.
///
/// Taking `Idempotent` as an argument and wrapping the handler body in
/// [`Idempotent::run`] protects that one route:
///
/// ```ignore
/// async fn create_payment(
///     idempotent: Idempotent,
///     Json(request): Json<CreatePaymentRequest>,
/// ) -> Result<JsonResponse<Payment>, IdempotencyError<ApiError>> {
///     idempotent.run(|| create(request.clone())).await
/// }
/// ```
pub struct Idempotent {
    interceptor: Arc<IdempotencyInterceptor>,
    method: Method,
    headers: HeaderMap,
}

impl Idempotent {
    pub fn new(interceptor: Arc<IdempotencyInterceptor>, method: Method, headers: HeaderMap) -> Self {
        Self {
            interceptor,
            method,
            headers,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Runs the handler body through the interceptor. The body may be called
    /// a second time when caching its response fails under a policy that
    /// absorbs failures.
    pub async fn run<R, E, F, Fut>(self, handler: F) -> Result<R, IdempotencyError<E>>
    where
        R: IdempotentResponse,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.interceptor
            .execute(&self.method, &self.headers, handler)
            .await
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Idempotent
where
    Arc<IdempotencyInterceptor>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::new(
            Arc::from_ref(state),
            parts.method.clone(),
            parts.headers.clone(),
        ))
    }
}
