use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{idempotency_middleware, track_http_metrics, IdempotencyLayerState};
use crate::idempotency::IdempotencyInterceptor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Arc<IdempotencyInterceptor>,
    pub max_body_bytes: usize,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(interceptor: Arc<IdempotencyInterceptor>, max_body_bytes: usize) -> Self {
        Self {
            interceptor,
            max_body_bytes,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

impl FromRef<AppState> for Arc<IdempotencyInterceptor> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.interceptor)
    }
}

/// Creates the main API router with all routes.
///
/// `/payments` opts in per handler; every route under `/orders` goes through
/// the idempotency middleware. Both share one interceptor.
pub fn create_router(state: AppState) -> Router {
    let layer_state = IdempotencyLayerState::new(Arc::clone(&state.interceptor), state.max_body_bytes);

    let orders = Router::new()
        .route("/orders", post(handlers::create_order))
        .route("/orders/:id", put(handlers::update_order))
        .route_layer(middleware::from_fn_with_state(layer_state, idempotency_middleware));

    Router::new()
        // Health endpoints
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoints
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/idempotency/stats", get(handlers::idempotency_stats))
        // Payment endpoints
        .route("/payments", post(handlers::create_payment))
        .merge(orders)
        .layer(middleware::from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
