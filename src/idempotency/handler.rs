use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::IdempotencyError;
use crate::idempotency::cache::ResponseCache;
use crate::idempotency::envelope::{IdempotentResponse, ResponseEnvelope};
use crate::idempotency::key::{extract_key, is_intercepted_method, should_intercept, IdempotencyKey};
use crate::observability::get_metrics;

/// How infrastructure failures are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// Propagate the failure, or with `retry_on_error` run the handler once
    /// without idempotency handling.
    Strict { retry_on_error: bool },
    /// Never propagate; run the handler as if idempotency were disabled.
    Lenient,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Lenient
    }
}

impl FallbackPolicy {
    fn absorbs_errors(&self) -> bool {
        matches!(
            self,
            FallbackPolicy::Lenient
                | FallbackPolicy::Strict {
                    retry_on_error: true
                }
        )
    }
}

/// Path a request took through the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptOutcome {
    Bypass,
    CacheHit,
    CacheMissExecute,
    FallbackOnError,
}

impl InterceptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterceptOutcome::Bypass => "bypass",
            InterceptOutcome::CacheHit => "hit",
            InterceptOutcome::CacheMissExecute => "miss",
            InterceptOutcome::FallbackOnError => "fallback",
        }
    }
}

/// Metrics for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub total_requests: AtomicU64,
    pub bypassed_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub executed_requests: AtomicU64,
    pub fallback_requests: AtomicU64,
    pub committed_responses: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: InterceptOutcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            InterceptOutcome::Bypass => &self.bypassed_requests,
            InterceptOutcome::CacheHit => &self.replayed_requests,
            InterceptOutcome::CacheMissExecute => &self.executed_requests,
            InterceptOutcome::FallbackOnError => &self.fallback_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_intercept(outcome.as_str());
    }

    pub fn record_committed(&self) {
        self.committed_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            executed_requests: self.executed_requests.load(Ordering::Relaxed),
            fallback_requests: self.fallback_requests.load(Ordering::Relaxed),
            committed_responses: self.committed_responses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub bypassed_requests: u64,
    pub replayed_requests: u64,
    pub executed_requests: u64,
    pub fallback_requests: u64,
    pub committed_responses: u64,
}

impl MetricsSnapshot {
    pub fn replay_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.replayed_requests as f64 / self.total_requests as f64
        }
    }
}

/// Idempotency interceptor shared by the handler decorator and the middleware.
pub struct IdempotencyInterceptor {
    cache: ResponseCache,
    policy: FallbackPolicy,
    metrics: Arc<IdempotencyMetrics>,
}

impl IdempotencyInterceptor {
    pub fn new(cache: ResponseCache, policy: FallbackPolicy) -> Self {
        Self {
            cache,
            policy,
            metrics: Arc::new(IdempotencyMetrics::new()),
        }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Gets the metrics for this interceptor.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs `handler` under idempotency protection.
    ///
    /// Handler errors come back as `HandlerExecution`; any other variant is an
    /// infrastructure failure the strict policy chose to propagate. The
    /// handler may run a second time when caching fails after it returned and
    /// the policy absorbs the failure.
    pub async fn execute<R, E, F, Fut>(
        &self,
        method: &Method,
        headers: &HeaderMap,
        mut handler: F,
    ) -> Result<R, IdempotencyError<E>>
    where
        R: IdempotentResponse,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        // The header is only read for methods that can be intercepted.
        let key = if is_intercepted_method(method) {
            extract_key(headers)
        } else {
            Ok(None)
        };

        let key = match key {
            Ok(Some(key)) if should_intercept(method, Some(&key)) => key,
            Ok(_) => {
                self.metrics.record(InterceptOutcome::Bypass);
                return handler().await.map_err(IdempotencyError::HandlerExecution);
            }
            Err(err) => return self.fall_back(err, handler).await,
        };

        let cached = match self.cache.lookup(&key).await {
            Ok(cached) => cached,
            Err(err) => return self.fall_back(err, handler).await,
        };

        if let Some(envelope) = cached {
            match envelope.replay::<R>() {
                Ok(response) => {
                    tracing::debug!(key = %key.fingerprint(), method = %method, "Replaying cached response");
                    self.metrics.record(InterceptOutcome::CacheHit);
                    return Ok(response);
                }
                Err(err) => return self.fall_back(err, handler).await,
            }
        }

        self.metrics.record(InterceptOutcome::CacheMissExecute);
        let response = handler().await.map_err(IdempotencyError::HandlerExecution)?;

        let envelope = match self.prepare_envelope(&key, &response) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(response),
            Err(err) => return self.fall_back(err, handler).await,
        };

        match self.cache.commit(&key, &envelope).await {
            Ok(stored) => {
                if stored {
                    self.metrics.record_committed();
                }
                Ok(response)
            }
            Err(err) => self.fall_back(err, handler).await,
        }
    }

    /// Snapshots a successful, well-formed response. `None` means the
    /// response is returned but not cached.
    fn prepare_envelope<R: IdempotentResponse>(
        &self,
        key: &IdempotencyKey,
        response: &R,
    ) -> crate::error::Result<Option<ResponseEnvelope>> {
        if !response.status().is_success() {
            tracing::debug!(
                key = %key.fingerprint(),
                status = response.status().as_u16(),
                "Not caching unsuccessful response"
            );
            return Ok(None);
        }
        if !response.is_capturable() {
            tracing::debug!(key = %key.fingerprint(), "Response body cannot be captured, not caching");
            return Ok(None);
        }

        ResponseEnvelope::capture(response).map(Some)
    }

    /// Resolves an infrastructure failure: propagate it, or run the handler
    /// once with idempotency handling switched off.
    async fn fall_back<R, E, F, Fut>(
        &self,
        err: IdempotencyError,
        mut handler: F,
    ) -> Result<R, IdempotencyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        get_metrics().record_infrastructure_error(err.kind());

        if !self.policy.absorbs_errors() {
            tracing::error!(kind = err.kind(), error = %err, "Idempotency infrastructure failure");
            return Err(err.with_handler_error());
        }

        tracing::warn!(
            kind = err.kind(),
            error = %err,
            "Idempotency infrastructure failure, running handler without protection"
        );
        self.metrics.record(InterceptOutcome::FallbackOnError);
        handler().await.map_err(IdempotencyError::HandlerExecution)
    }
}
