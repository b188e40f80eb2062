//! Sliding-window admission control per external service

use super::health::ServiceKind;
use crate::config::{Config, RateLimitConfig, DISCOVERY_SERVICE, GENERATION_SERVICE};
use crate::metrics::METRICS;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Returned by [`RateLimiter::acquire_within_quota`] when the rolling daily quota is used up
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("daily quota exhausted for {service}: {used}/{limit} requests in the last 24h, next slot in {retry_in:?}")]
pub struct QuotaExhausted {
    pub service: String,
    pub used: usize,
    pub limit: usize,
    pub retry_in: Duration,
}

#[derive(Debug, Default)]
struct LimiterState {
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
    blocked_until: Option<Instant>,
    last_wait: Duration,
}

enum Admission {
    Admitted,
    Wait(Duration),
    Exhausted { used: usize, retry_in: Duration },
}

/// Per-service rate limiter.
///
/// Callers pass a FIFO turnstile one at a time, then wait inside it until
/// the one-minute window (and optional 24h window) has room. Waiting happens
/// while holding the turnstile so later callers cannot overtake earlier ones.
pub struct RateLimiter {
    service: String,
    requests_per_minute: usize,
    daily_limit: Option<usize>,
    turnstile: tokio::sync::Mutex<()>,
    state: Mutex<LimiterState>,
    waiting: AtomicUsize,
}

impl RateLimiter {
    pub fn new(service: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            service: service.into(),
            requests_per_minute: config.requests_per_minute.max(1) as usize,
            daily_limit: config.daily_limit.map(|limit| limit.max(1) as usize),
            turnstile: tokio::sync::Mutex::new(()),
            state: Mutex::new(LimiterState::default()),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wait for a slot. Never rejects; returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        match self.admit(false).await {
            Ok(waited) => waited,
            // unreachable: daily exhaustion only surfaces when enforced
            Err(_) => Duration::ZERO,
        }
    }

    /// Wait for a slot under the per-minute ceiling, but fail fast instead of
    /// waiting hours when the daily quota is used up.
    pub async fn acquire_within_quota(&self) -> Result<Duration, QuotaExhausted> {
        self.admit(true).await
    }

    /// Hold every admission until `duration` has elapsed
    pub fn block_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.lock_state();
        if state.blocked_until.map_or(true, |current| current < until) {
            state.blocked_until = Some(until);
        }
        warn!("Blocking {} for {:?} after provider rejection", self.service, duration);
    }

    /// Callers currently waiting for a slot
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait duration of the most recent admission
    pub fn last_wait(&self) -> Duration {
        self.lock_state().last_wait
    }

    /// Returns (used, limit) for the rolling 24h window, if a daily limit is set
    pub fn daily_usage(&self) -> Option<(usize, usize)> {
        let limit = self.daily_limit?;
        let now = Instant::now();
        let mut state = self.lock_state();
        prune(&mut state.day, now, DAY);
        Some((state.day.len(), limit))
    }

    async fn admit(&self, enforce_daily: bool) -> Result<Duration, QuotaExhausted> {
        let _waiting = WaitingGuard::enter(self);
        let started = Instant::now();
        let _turn = self.turnstile.lock().await;

        loop {
            let admission = self.try_admit(Instant::now(), enforce_daily);
            match admission {
                Admission::Admitted => break,
                Admission::Wait(delay) => {
                    debug!("Local rate limit for {}, sleeping {:?}", self.service, delay);
                    tokio::time::sleep(delay).await;
                }
                Admission::Exhausted { used, retry_in } => {
                    let limit = self.daily_limit.unwrap_or(used);
                    error!(
                        "Daily quota exhausted for {} ({}/{} used), next slot in {:.1}h",
                        self.service,
                        used,
                        limit,
                        retry_in.as_secs_f64() / 3600.0
                    );
                    return Err(QuotaExhausted {
                        service: self.service.clone(),
                        used,
                        limit,
                        retry_in,
                    });
                }
            }
        }

        let waited = started.elapsed();
        self.lock_state().last_wait = waited;
        METRICS.record_admission(&self.service, waited);
        if waited > Duration::ZERO {
            info!("Admitted {} call after waiting {:.2}s", self.service, waited.as_secs_f64());
        }
        Ok(waited)
    }

    fn try_admit(&self, now: Instant, enforce_daily: bool) -> Admission {
        let mut state = self.lock_state();

        if let Some(until) = state.blocked_until {
            if now < until {
                return Admission::Wait(until - now);
            }
            state.blocked_until = None;
        }

        if let Some(limit) = self.daily_limit {
            prune(&mut state.day, now, DAY);
            if state.day.len() >= limit {
                let retry_in = state
                    .day
                    .front()
                    .map(|oldest| (*oldest + DAY).saturating_duration_since(now))
                    .unwrap_or(DAY);
                if enforce_daily {
                    return Admission::Exhausted {
                        used: state.day.len(),
                        retry_in,
                    };
                }
                return Admission::Wait(retry_in);
            }
        }

        prune(&mut state.minute, now, MINUTE);
        if state.minute.len() >= self.requests_per_minute {
            let delay = state
                .minute
                .front()
                .map(|oldest| (*oldest + MINUTE).saturating_duration_since(now))
                .unwrap_or(MINUTE);
            return Admission::Wait(delay);
        }

        state.minute.push_back(now);
        if self.daily_limit.is_some() {
            state.day.push_back(now);
        }
        Admission::Admitted
    }

    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One limiter per external service, created for each run
pub struct RateLimiters {
    discovery: RateLimiter,
    generation: RateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &Config) -> Self {
        Self {
            discovery: RateLimiter::new(
                DISCOVERY_SERVICE,
                &config.rate_limit_for(DISCOVERY_SERVICE),
            ),
            generation: RateLimiter::new(
                GENERATION_SERVICE,
                &config.rate_limit_for(GENERATION_SERVICE),
            ),
        }
    }

    pub fn get(&self, service: ServiceKind) -> &RateLimiter {
        match service {
            ServiceKind::Discovery => &self.discovery,
            ServiceKind::Generation => &self.generation,
        }
    }
}

/// Drop expired timestamps from the front of a window
fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(oldest) = window.front() {
        if *oldest + span <= now {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Keeps the queue depth accurate even when the waiting future is dropped
struct WaitingGuard<'a> {
    limiter: &'a RateLimiter,
}

impl<'a> WaitingGuard<'a> {
    fn enter(limiter: &'a RateLimiter) -> Self {
        let depth = limiter.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        METRICS.set_queue_depth(&limiter.service, depth);
        Self { limiter }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let depth = self.limiter.waiting.fetch_sub(1, Ordering::SeqCst) - 1;
        METRICS.set_queue_depth(&self.limiter.service, depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(rpm: u32, daily_limit: Option<u32>) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            "test",
            &RateLimitConfig {
                requests_per_minute: rpm,
                daily_limit,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_under_ceiling_admits_immediately() {
        let limiter = limiter(5, None);
        for _ in 0..5 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        assert_eq!(limiter.last_wait(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_holds_under_concurrency() {
        let limiter = limiter(3, None);
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..7 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        for (i, t) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .filter(|other| **other < *t + MINUTE)
                .count();
            assert!(in_window <= 3, "{} admissions within one minute", in_window);
        }
        assert_eq!(admitted[6] - start, Duration::from_secs(120));
        assert_eq!(limiter.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_in_order() {
        let limiter = limiter(1, None);
        limiter.acquire().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for id in 0..3 {
            let limiter = limiter.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                limiter.acquire().await;
                tx.send(id).unwrap();
            });
            tokio::task::yield_now().await;
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(id) = rx.recv().await {
            order.push(id);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_for_delays_admission() {
        let limiter = limiter(10, None);
        limiter.block_for(Duration::from_secs(5));

        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_secs(5));
        assert_eq!(limiter.last_wait(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_quota_fails_fast() {
        let limiter = limiter(10, Some(2));
        assert!(limiter.acquire_within_quota().await.is_ok());
        assert!(limiter.acquire_within_quota().await.is_ok());

        let err = limiter.acquire_within_quota().await.unwrap_err();
        assert_eq!(err.used, 2);
        assert_eq!(err.limit, 2);
        assert_eq!(err.service, "test");
        assert_eq!(limiter.daily_usage(), Some((2, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_acquire_waits_out_daily_quota() {
        let limiter = limiter(10, Some(1));
        limiter.acquire().await;

        let waited = limiter.acquire().await;
        assert_eq!(waited, DAY);
    }

    #[test]
    fn test_registry_uses_configured_ceilings() {
        let limiters = RateLimiters::from_config(&Config::default());
        assert_eq!(limiters.get(ServiceKind::Discovery).service(), "discovery");
        assert_eq!(limiters.get(ServiceKind::Discovery).requests_per_minute, 15);
        assert_eq!(limiters.get(ServiceKind::Generation).requests_per_minute, 20);
    }
}
