use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics recorder facade for the idempotency layer.
///
/// Without an installed recorder every call is a no-op, so library users who
/// do not export metrics pay nothing.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_intercept(&self, outcome: &'static str) {
        counter!("idempotency_requests_total", "outcome" => outcome).increment(1);
    }

    pub fn record_commit(&self, stored: bool) {
        counter!("idempotency_commits_total", "stored" => stored.to_string()).increment(1);
    }

    pub fn record_infrastructure_error(&self, kind: &'static str) {
        counter!("idempotency_infrastructure_errors_total", "kind" => kind).increment(1);
    }

    pub fn record_cache_operation(&self, operation: &'static str, duration_ms: f64, success: bool) {
        counter!("idempotency_cache_operations_total", "operation" => operation, "success" => success.to_string()).increment(1);
        histogram!("idempotency_cache_operation_duration_ms", "operation" => operation).record(duration_ms);
    }

    pub fn record_http_request(&self, method: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    // The global recorder can be set only once.
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Requests seen by the idempotency interceptor, by outcome");
    describe_counter!("idempotency_commits_total", Unit::Count, "Attempts to commit a response, by whether the write happened");
    describe_counter!("idempotency_infrastructure_errors_total", Unit::Count, "Cache and serialization failures, by kind");

    describe_counter!("idempotency_cache_operations_total", Unit::Count, "Response store operations");
    describe_histogram!("idempotency_cache_operation_duration_ms", Unit::Milliseconds, "Response store latency in milliseconds");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
