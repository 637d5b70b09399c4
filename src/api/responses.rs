use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdempotencyError;
use crate::idempotency::{
    render_json, IdempotentResponse, MetricsSnapshot, ResponseEnvelope, CANONICAL_CONTENT_TYPE,
};

/// Standard API response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Validation error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

/// Created payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Created or replaced order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub item: String,
    pub quantity: u32,
    pub updated_at: DateTime<Utc>,
}

/// Idempotency counters exposed by the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyStatsResponse {
    pub requests: MetricsSnapshot,
    pub cache_hit_rate: f64,
    pub cache_errors: u64,
}

/// Error returned by a handler: a status plus the standard error body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(code, message),
        }
    }

    pub fn validation(details: Vec<ValidationErrorDetail>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::new("VALIDATION_ERROR", "Request validation failed")
                .with_details(details),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status.as_u16(), self.body.code, self.body.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.body))).into_response()
    }
}

/// Handler errors render as themselves; infrastructure failures that the
/// strict policy propagated become a 500.
impl<E> IntoResponse for IdempotencyError<E>
where
    E: IntoResponse + std::fmt::Display,
{
    fn into_response(self) -> Response {
        if self.is_infrastructure() {
            tracing::error!(kind = self.kind(), error = %self, "Idempotency layer unavailable");
            return unavailable();
        }

        match self.into_handler_error() {
            Some(err) => err.into_response(),
            None => unavailable(),
        }
    }
}

fn unavailable() -> Response {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "IDEMPOTENCY_UNAVAILABLE",
        "Idempotency handling is currently unavailable",
    )
    .into_response()
}

/// JSON response that can be cached and replayed by the idempotency layer.
///
/// The body is any serde type; `()` renders as an empty body. The media type
/// defaults to `application/json`.
#[derive(Debug, Clone)]
pub struct JsonResponse<T> {
    status: StatusCode,
    data: T,
    headers: HeaderMap,
    content_type: Option<String>,
    template_name: Option<String>,
}

impl<T> JsonResponse<T> {
    pub fn new(status: StatusCode, data: T) -> Self {
        Self {
            status,
            data,
            headers: HeaderMap::new(),
            content_type: None,
            template_name: None,
        }
    }

    pub fn ok(data: T) -> Self {
        Self::new(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self::new(StatusCode::CREATED, data)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_template_name(mut self, template_name: impl Into<String>) -> Self {
        self.template_name = Some(template_name.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }
}

impl<T: Serialize> IntoResponse for JsonResponse<T> {
    fn into_response(self) -> Response {
        let body = match serde_json::to_value(&self.data)
            .map_err(IdempotencyError::from)
            .and_then(|value| render_json(&value))
        {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, "Failed to render response body");
                return ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERIALIZATION_ERROR",
                    "Failed to render response",
                )
                .into_response();
            }
        };

        let media_type = self.content_type.as_deref().unwrap_or(CANONICAL_CONTENT_TYPE);
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        match HeaderValue::from_str(media_type) {
            Ok(value) => {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            Err(_) => {
                tracing::warn!(content_type = media_type, "Invalid content type, using default");
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(CANONICAL_CONTENT_TYPE));
            }
        }

        response
    }
}

impl<T> IdempotentResponse for JsonResponse<T>
where
    T: Serialize + DeserializeOwned,
{
    fn status(&self) -> StatusCode {
        self.status
    }

    fn encode_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.data)
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    fn template_name(&self) -> Option<String> {
        self.template_name.clone()
    }

    fn from_envelope(envelope: ResponseEnvelope) -> crate::error::Result<Self> {
        let status = envelope.status_code()?;
        let mut headers = envelope.header_map()?;
        // The media type lives in `content_type` and is set when rendering.
        headers.remove(CONTENT_TYPE);

        Ok(Self {
            status,
            data: serde_json::from_value(envelope.data)?,
            headers,
            content_type: envelope.content_type,
            template_name: envelope.template_name,
        })
    }
}
