use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{request, response::Parts, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::de::Error as _;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::idempotency::{render_json, IdempotencyInterceptor, IdempotentResponse, ResponseEnvelope};
use crate::observability::{get_metrics, LatencyTimer};

/// State for [`idempotency_middleware`].
#[derive(Clone)]
pub struct IdempotencyLayerState {
    pub interceptor: Arc<IdempotencyInterceptor>,
    /// Largest body the middleware will buffer for caching.
    pub max_body_bytes: usize,
}

impl IdempotencyLayerState {
    pub fn new(interceptor: Arc<IdempotencyInterceptor>, max_body_bytes: usize) -> Self {
        Self {
            interceptor,
            max_body_bytes,
        }
    }
}

/// Pipeline-wide idempotency for axum routers.
///
/// Install with `axum::middleware::from_fn_with_state`. Only responses whose
/// body has a known size within `max_body_bytes` and holds JSON (or nothing)
/// are cached; anything else passes through untouched. Request bodies of a
/// known size within the same limit are buffered so the downstream handler
/// can run again after a caching failure.
pub async fn idempotency_middleware(
    State(state): State<IdempotencyLayerState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let max_body_bytes = state.max_body_bytes;

    let mut request = match ReplayableRequest::buffer(request, max_body_bytes).await {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let result = state
        .interceptor
        .execute(&method, &headers, move || {
            let next = next.clone();
            let request = request.next_request();
            async move {
                match request {
                    Ok(request) => BufferedResponse::buffer(next.run(request).await, max_body_bytes).await,
                    Err(err) => Err(err),
                }
            }
        })
        .await;

    match result {
        Ok(response) => response.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Records request counts and latency.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().clone();

    let response = next.run(request).await;

    get_metrics().record_http_request(method.as_str(), response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Body failures inside the middleware.
#[derive(Debug, Error)]
pub enum BodyBufferError {
    #[error("failed to read request body: {0}")]
    Request(axum::Error),

    #[error("failed to buffer response body: {0}")]
    Response(axum::Error),

    #[error("request body was streamed and cannot be sent again")]
    NotReplayable,
}

impl IntoResponse for BodyBufferError {
    fn into_response(self) -> Response {
        match self {
            BodyBufferError::Request(_) => {
                tracing::warn!(error = %self, "Rejecting request with unreadable body");
                StatusCode::BAD_REQUEST.into_response()
            }
            _ => {
                tracing::error!(error = %self, "Body failed inside idempotency middleware");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// An incoming request that can be handed downstream more than once.
enum ReplayableRequest {
    Buffered { parts: request::Parts, body: Bytes },
    /// Unknown or oversized length; usable once.
    Streaming(Option<Request>),
}

impl ReplayableRequest {
    async fn buffer(request: Request, max_body_bytes: usize) -> Result<Self, BodyBufferError> {
        let (parts, body) = request.into_parts();

        let fits = body
            .size_hint()
            .exact()
            .map_or(false, |len| len <= max_body_bytes as u64);
        if !fits {
            return Ok(Self::Streaming(Some(Request::from_parts(parts, body))));
        }

        let body = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(BodyBufferError::Request)?;
        Ok(Self::Buffered { parts, body })
    }

    fn next_request(&mut self) -> Result<Request, BodyBufferError> {
        match self {
            Self::Buffered { parts, body } => Ok(Request::from_parts(parts.clone(), Body::from(body.clone()))),
            Self::Streaming(request) => request.take().ok_or(BodyBufferError::NotReplayable),
        }
    }
}

enum BufferedBody {
    /// Fully read, and either empty or valid JSON.
    Json { bytes: Bytes, value: Value },
    /// Fully read, but not JSON.
    Opaque(Bytes),
    /// Unknown or oversized length; never read.
    Streaming(Body),
}

/// A downstream response, buffered when it is small enough to cache.
pub struct BufferedResponse {
    parts: Parts,
    body: BufferedBody,
}

impl BufferedResponse {
    pub async fn buffer(response: Response, max_body_bytes: usize) -> Result<Self, BodyBufferError> {
        let (parts, body) = response.into_parts();

        let fits = body
            .size_hint()
            .exact()
            .map_or(false, |len| len <= max_body_bytes as u64);
        if !fits {
            return Ok(Self {
                parts,
                body: BufferedBody::Streaming(body),
            });
        }

        let bytes = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(BodyBufferError::Response)?;

        let body = if bytes.is_empty() {
            BufferedBody::Json {
                bytes,
                value: Value::Null,
            }
        } else {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => BufferedBody::Json { bytes, value },
                Err(_) => BufferedBody::Opaque(bytes),
            }
        };

        Ok(Self { parts, body })
    }

    pub fn is_buffered(&self) -> bool {
        !matches!(self.body, BufferedBody::Streaming(_))
    }
}

impl IdempotentResponse for BufferedResponse {
    fn status(&self) -> StatusCode {
        self.parts.status
    }

    fn encode_body(&self) -> Result<Value, serde_json::Error> {
        match &self.body {
            BufferedBody::Json { value, .. } => Ok(value.clone()),
            _ => Err(serde_json::Error::custom("response body was not buffered as JSON")),
        }
    }

    fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    fn content_type(&self) -> Option<String> {
        self.parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn is_capturable(&self) -> bool {
        matches!(self.body, BufferedBody::Json { .. })
    }

    fn from_envelope(envelope: ResponseEnvelope) -> crate::error::Result<Self> {
        let (mut parts, ()) = Response::new(()).into_parts();
        parts.status = envelope.status_code()?;
        parts.headers = envelope.header_map()?;

        let bytes = Bytes::from(render_json(&envelope.data)?);
        Ok(Self {
            parts,
            body: BufferedBody::Json {
                bytes,
                value: envelope.data,
            },
        })
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            BufferedBody::Json { bytes, .. } | BufferedBody::Opaque(bytes) => Body::from(bytes),
            BufferedBody::Streaming(body) => body,
        };
        Response::from_parts(self.parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{FallbackPolicy, InMemoryResponseStore, ResponseCache, IDEMPOTENCY_KEY_HEADER};
    use axum::http::{HeaderValue, Method};
    use serde_json::json;

    fn assert_send<T: Send>(_: &T) {}

    fn post_request(body: &'static str) -> Request {
        Request::builder()
            .method(Method::POST)
            .uri("/orders")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_of(request: Request) -> Bytes {
        axum::body::to_bytes(request.into_body(), usize::MAX).await.unwrap()
    }

    fn json_response(body: &str) -> Response {
        let mut response = Response::new(Body::from(body.to_string()));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    #[tokio::test]
    async fn test_buffers_json_body() {
        let buffered = BufferedResponse::buffer(json_response(r#"{"id":1}"#), 1024)
            .await
            .unwrap();

        assert!(buffered.is_capturable());
        assert_eq!(buffered.encode_body().unwrap(), json!({ "id": 1 }));
        assert_eq!(buffered.content_type().as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_empty_body_is_capturable() {
        let buffered = BufferedResponse::buffer(Response::new(Body::empty()), 1024)
            .await
            .unwrap();

        assert!(buffered.is_capturable());
        assert_eq!(buffered.encode_body().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_non_json_body_is_not_capturable() {
        let buffered = BufferedResponse::buffer(Response::new(Body::from("plain text")), 1024)
            .await
            .unwrap();

        assert!(buffered.is_buffered());
        assert!(!buffered.is_capturable());
        assert!(buffered.encode_body().is_err());
    }

    #[tokio::test]
    async fn test_oversized_body_streams_through() {
        let buffered = BufferedResponse::buffer(json_response(r#"{"id":1}"#), 4)
            .await
            .unwrap();

        assert!(!buffered.is_buffered());
        assert!(!buffered.is_capturable());

        let body = axum::body::to_bytes(buffered.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_from_envelope_renders_cached_body() {
        let envelope = ResponseEnvelope {
            data: json!({ "id": 9 }),
            status: 201,
            template_name: None,
            headers: vec![("x-request-source".to_string(), "api".to_string())],
            content_type: None,
        };

        let response = BufferedResponse::from_envelope(envelope).unwrap().into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()["x-request-source"], "api");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"id":9}"#);
    }

    #[tokio::test]
    async fn test_interceptor_future_is_send_for_buffered_responses() {
        let cache = ResponseCache::new(Arc::new(InMemoryResponseStore::new()));
        let interceptor = IdempotencyInterceptor::new(cache, FallbackPolicy::Lenient);
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("send-1"));

        let future = interceptor.execute(&Method::POST, &headers, || async {
            BufferedResponse::buffer(json_response(r#"{"id":1}"#), 1024).await
        });
        assert_send(&future);

        let response = future.await.unwrap();
        assert!(response.is_capturable());
        assert_eq!(interceptor.metrics().snapshot().committed_responses, 1);
    }

    #[tokio::test]
    async fn test_buffered_request_can_be_sent_twice() {
        let mut request = ReplayableRequest::buffer(post_request(r#"{"item":"w"}"#), 1024)
            .await
            .unwrap();

        for _ in 0..2 {
            let next = request.next_request().unwrap();
            assert_eq!(next.method(), Method::POST);
            assert_eq!(next.uri(), "/orders");
            assert_eq!(&body_of(next).await[..], br#"{"item":"w"}"#);
        }
    }

    #[tokio::test]
    async fn test_oversized_request_is_sent_once() {
        let mut request = ReplayableRequest::buffer(post_request(r#"{"item":"w"}"#), 4)
            .await
            .unwrap();

        let first = request.next_request().unwrap();
        assert_eq!(&body_of(first).await[..], br#"{"item":"w"}"#);
        assert!(matches!(request.next_request(), Err(BodyBufferError::NotReplayable)));
    }

    #[tokio::test]
    async fn test_not_replayable_renders_500() {
        let response = BodyBufferError::NotReplayable.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
