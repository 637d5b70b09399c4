use axum::{
    extract::{Path, State},
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::api::extractors::Idempotent;
use crate::api::requests::{CreatePaymentRequest, OrderRequest, ValidationError};
use crate::api::responses::{
    ApiError, ApiResponse, IdempotencyStatsResponse, JsonResponse, OrderResponse, PaymentResponse,
    ValidationErrorDetail,
};
use crate::error::IdempotencyError;

use super::routes::AppState;

fn validation_error(errors: Vec<ValidationError>) -> ApiError {
    let details = errors
        .into_iter()
        .map(|e| ValidationErrorDetail {
            field: e.field,
            message: e.message,
        })
        .collect();
    ApiError::validation(details)
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized".to_string()),
    }
}

/// Idempotency counters for this process.
pub async fn idempotency_stats(State(state): State<AppState>) -> Json<ApiResponse<IdempotencyStatsResponse>> {
    let stats = state.interceptor.cache().stats();
    Json(ApiResponse::success(IdempotencyStatsResponse {
        requests: state.interceptor.metrics().snapshot(),
        cache_hit_rate: stats.hit_rate(),
        cache_errors: stats.get_errors(),
    }))
}

// ============================================================================
// Payment Handlers
// ============================================================================

/// Create a payment. Protected per handler through the `Idempotent` extractor.
pub async fn create_payment(
    idempotent: Idempotent,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<JsonResponse<PaymentResponse>, IdempotencyError<ApiError>> {
    idempotent
        .run(move || {
            let request = request.clone();
            async move {
                request.validate().map_err(validation_error)?;

                let payment = PaymentResponse {
                    id: Uuid::new_v4(),
                    amount: request.amount,
                    currency: request.currency.to_uppercase(),
                    reference: request.reference,
                    created_at: Utc::now(),
                };
                let location = HeaderValue::from_str(&format!("/payments/{}", payment.id)).map_err(|e| {
                    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
                })?;

                tracing::info!(payment_id = %payment.id, amount = %payment.amount, "Payment created");
                Ok::<_, ApiError>(JsonResponse::created(payment).with_header(LOCATION, location))
            }
        })
        .await
}

// ============================================================================
// Order Handlers
// ============================================================================

/// Create an order. Protected by the router-level idempotency middleware.
pub async fn create_order(
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ApiError> {
    request.validate().map_err(validation_error)?;

    let order = OrderResponse {
        id: Uuid::new_v4(),
        item: request.item,
        quantity: request.quantity,
        updated_at: Utc::now(),
    };

    tracing::info!(order_id = %order.id, "Order created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// Replace an order.
pub async fn update_order(
    Path(id): Path<Uuid>,
    Json(request): Json<OrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ApiError> {
    request.validate().map_err(validation_error)?;

    let order = OrderResponse {
        id,
        item: request.item,
        quantity: request.quantity,
        updated_at: Utc::now(),
    };

    tracing::info!(order_id = %order.id, "Order updated");
    Ok(Json(ApiResponse::success(order)))
}
