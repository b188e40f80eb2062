//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
    register_int_gauge_vec_with_registry, Counter, CounterVec, Histogram, HistogramVec,
    IntGaugeVec, Opts, Registry,
};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // External call metrics
    pub external_calls: CounterVec,
    pub external_call_duration: HistogramVec,
    pub retries: CounterVec,
    pub degraded_services: CounterVec,

    // Rate limiting metrics
    pub rate_limit_admissions: CounterVec,
    pub rate_limit_wait: HistogramVec,
    pub rate_limit_queue_depth: IntGaugeVec,

    // Token budget metrics
    pub batch_token_estimate: Histogram,
    pub batch_splits: Counter,
    pub context_truncations: Counter,

    // Result metrics
    pub skill_results: CounterVec,
    pub run_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let external_calls = register_counter_vec_with_registry!(
            Opts::new("pipeline_external_calls_total", "Total external service calls"),
            &["service", "outcome"],
            registry
        )?;

        let external_call_duration = register_histogram_vec_with_registry!(
            "pipeline_external_call_duration_seconds",
            "External service call duration in seconds",
            &["service"],
            registry
        )?;

        let retries = register_counter_vec_with_registry!(
            Opts::new("pipeline_retries_total", "Total retried external calls"),
            &["service"],
            registry
        )?;

        let degraded_services = register_counter_vec_with_registry!(
            Opts::new("pipeline_degraded_services_total", "Services degraded by a fatal error"),
            &["service"],
            registry
        )?;

        let rate_limit_admissions = register_counter_vec_with_registry!(
            Opts::new("pipeline_rate_limit_admissions_total", "Requests admitted by the rate limiter"),
            &["service"],
            registry
        )?;

        let rate_limit_wait = register_histogram_vec_with_registry!(
            "pipeline_rate_limit_wait_seconds",
            "Time spent waiting for a rate limit slot",
            &["service"],
            registry
        )?;

        let rate_limit_queue_depth = register_int_gauge_vec_with_registry!(
            Opts::new("pipeline_rate_limit_queue_depth", "Callers waiting for a rate limit slot"),
            &["service"],
            registry
        )?;

        let batch_token_estimate = register_histogram_with_registry!(
            "pipeline_batch_token_estimate",
            "Estimated context tokens per generation batch",
            registry
        )?;

        let batch_splits = register_counter_with_registry!(
            Opts::new("pipeline_batch_splits_total", "Batches split for exceeding the token budget"),
            registry
        )?;

        let context_truncations = register_counter_with_registry!(
            Opts::new("pipeline_context_truncations_total", "Single-skill contexts truncated to the budget"),
            registry
        )?;

        let skill_results = register_counter_vec_with_registry!(
            Opts::new("pipeline_skill_results_total", "Terminal skill results"),
            &["status", "strategy"],
            registry
        )?;

        let run_duration = register_histogram_with_registry!(
            "pipeline_run_duration_seconds",
            "Pipeline run duration in seconds",
            registry
        )?;

        Ok(Self {
            registry,
            external_calls,
            external_call_duration,
            retries,
            degraded_services,
            rate_limit_admissions,
            rate_limit_wait,
            rate_limit_queue_depth,
            batch_token_estimate,
            batch_splits,
            context_truncations,
            skill_results,
            run_duration,
        })
    }

    /// Record one external call attempt
    pub fn record_call(&self, service: &str, outcome: &str, elapsed: Duration) {
        self.external_calls
            .with_label_values(&[service, outcome])
            .inc();
        self.external_call_duration
            .with_label_values(&[service])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_retry(&self, service: &str) {
        self.retries.with_label_values(&[service]).inc();
    }

    pub fn record_degraded(&self, service: &str) {
        self.degraded_services.with_label_values(&[service]).inc();
    }

    /// Record a rate limiter admission and how long it waited
    pub fn record_admission(&self, service: &str, waited: Duration) {
        self.rate_limit_admissions.with_label_values(&[service]).inc();
        self.rate_limit_wait
            .with_label_values(&[service])
            .observe(waited.as_secs_f64());
    }

    pub fn set_queue_depth(&self, service: &str, depth: usize) {
        self.rate_limit_queue_depth
            .with_label_values(&[service])
            .set(depth as i64);
    }

    /// Record the estimate for a batch about to be checked against the budget
    pub fn record_batch_estimate(&self, tokens: usize) {
        self.batch_token_estimate.observe(tokens as f64);
    }

    pub fn record_split(&self) {
        self.batch_splits.inc();
    }

    pub fn record_truncation(&self) {
        self.context_truncations.inc();
    }

    pub fn record_skill_result(&self, status: &str, strategy: &str) {
        self.skill_results.with_label_values(&[status, strategy]).inc();
    }

    pub fn record_run(&self, elapsed: Duration) {
        self.run_duration.observe(elapsed.as_secs_f64());
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
