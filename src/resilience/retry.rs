//! Rate-limited, classified retry around external calls

use super::classifier::{ErrorClassifier, ErrorCode, FailureClass, ServiceError};
use super::health::{ServiceHealth, ServiceKind};
use super::rate_limiter::RateLimiters;
use crate::config::RetryConfig;
use crate::metrics::METRICS;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Backoff settings resolved into durations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_jitter: Duration,
    pub backoff_max: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, call_timeout: Duration) -> Self {
        Self {
            max_retry_attempts: config.max_retry_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_multiplier: config.backoff_multiplier,
            backoff_jitter: Duration::from_millis(config.backoff_jitter_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            call_timeout,
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.backoff_base.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let max_millis = self.backoff_max.as_millis() as f64;
        Duration::from_millis(millis.min(max_millis).round() as u64)
    }

    /// Full delay for a retry: the provider hint when present, otherwise
    /// backoff plus jitter. Always capped at `backoff_max`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.backoff_max);
        }

        let jitter_ms = self.backoff_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (self.backoff(attempt) + jitter).min(self.backoff_max)
    }
}

/// Why a call produced no value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallFailure {
    /// The service is degraded for this run; no further calls are made
    #[error("{service} service unavailable for this run: {reason}")]
    Degraded {
        service: ServiceKind,
        reason: String,
        /// True only for the call whose Fatal error degraded the service
        newly_degraded: bool,
    },

    #[error("{service} rejected the request: {error}")]
    Rejected {
        service: ServiceKind,
        error: ServiceError,
    },

    #[error("{service} still failing after {attempts} attempts: {error}")]
    Exhausted {
        service: ServiceKind,
        attempts: u32,
        error: ServiceError,
    },

    #[error("run cancelled")]
    Cancelled,
}

/// Executes external calls under the run's rate limiters, health flags and
/// cancellation token
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: ErrorClassifier,
    limiters: Arc<RateLimiters>,
    health: Arc<ServiceHealth>,
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        limiters: Arc<RateLimiters>,
        health: Arc<ServiceHealth>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy,
            classifier: ErrorClassifier,
            limiters,
            health,
            cancel,
        }
    }

    pub fn health(&self) -> &ServiceHealth {
        &self.health
    }

    /// Run `call` until it succeeds, fails for good, or the run ends.
    ///
    /// Each attempt first takes a rate limiter slot for `service`. The call
    /// is never invoked once the service is degraded or the run is cancelled.
    pub async fn execute<T, F, Fut>(&self, service: ServiceKind, mut call: F) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let limiter = self.limiters.get(service);
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(CallFailure::Cancelled);
            }
            if self.health.is_degraded(service) {
                return Err(CallFailure::Degraded {
                    service,
                    reason: self.health.reason(service).unwrap_or_default(),
                    newly_degraded: false,
                });
            }
            attempt += 1;

            let admitted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CallFailure::Cancelled),
                admitted = limiter.acquire_within_quota() => admitted,
            };

            let started = Instant::now();
            let error = match admitted {
                Err(quota) => ServiceError::new(ErrorCode::QuotaExhausted, quota.to_string()),
                Ok(_) => {
                    // The run may have degraded while this caller waited. The slot just
                    // taken stays counted in the window even though no call is made.
                    if self.health.is_degraded(service) {
                        continue;
                    }
                    let outcome = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(CallFailure::Cancelled),
                        outcome = tokio::time::timeout(self.policy.call_timeout, call()) => outcome,
                    };
                    match outcome {
                        Ok(Ok(value)) => {
                            METRICS.record_call(service.as_str(), "success", started.elapsed());
                            if attempt > 1 {
                                debug!("{} call succeeded on attempt {}", service, attempt);
                            }
                            return Ok(value);
                        }
                        Ok(Err(error)) => error,
                        Err(_) => ServiceError::new(
                            ErrorCode::Timeout,
                            format!("call exceeded {:?}", self.policy.call_timeout),
                        ),
                    }
                }
            };

            let class = self.classifier.classify(&error);
            METRICS.record_call(service.as_str(), class.as_str(), started.elapsed());

            match class {
                FailureClass::Fatal => {
                    let newly_degraded = self.health.mark_degraded(service, error.to_string());
                    if newly_degraded {
                        METRICS.record_degraded(service.as_str());
                        error!("{} service degraded for this run: {}", service, error);
                    }
                    return Err(CallFailure::Degraded {
                        service,
                        reason: self
                            .health
                            .reason(service)
                            .unwrap_or_else(|| error.to_string()),
                        newly_degraded,
                    });
                }
                FailureClass::Permanent => {
                    warn!("{} call failed permanently: {}", service, error);
                    return Err(CallFailure::Rejected { service, error });
                }
                FailureClass::Transient => {
                    if attempt > self.policy.max_retry_attempts {
                        error!("{} call failed after {} attempts: {}", service, attempt, error);
                        return Err(CallFailure::Exhausted {
                            service,
                            attempts: attempt,
                            error,
                        });
                    }

                    let delay = self.policy.delay(attempt, error.retry_after);
                    if error.retry_after.is_some() {
                        limiter.block_for(delay);
                    }
                    METRICS.record_retry(service.as_str());
                    warn!(
                        "{} attempt {} failed: {}, retrying in {:?}",
                        service, attempt, error, delay
                    );

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(CallFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
