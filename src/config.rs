//! Configuration for the interview question pipeline

use crate::error::{PipelineError, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Service name used for the source-discovery capability.
pub const DISCOVERY_SERVICE: &str = "discovery";
/// Service name used for the question-generation capability.
pub const GENERATION_SERVICE: &str = "generation";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-service admission limits, keyed by service name
    #[serde(default = "default_rate_limits")]
    pub rate_limits: HashMap<String, RateLimitConfig>,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            rate_limits: default_rate_limits(),
            providers: ProvidersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, layered with `INTERVIEW__*` environment variables.
    ///
    /// `INTERVIEW__PIPELINE__BATCH_SIZE=5` overrides `pipeline.batch_size`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(true))
            .add_source(
                ::config::Environment::with_prefix("INTERVIEW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults overridden by the short-form environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PIPELINE_BATCH_SIZE") {
            if let Ok(num) = val.parse() {
                config.pipeline.batch_size = num;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_WORKERS") {
            if let Ok(num) = val.parse() {
                config.pipeline.worker_pool_width = num;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_TOKEN_BUDGET") {
            if let Ok(num) = val.parse() {
                config.pipeline.token_budget = num;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_MAX_RETRIES") {
            if let Ok(num) = val.parse() {
                config.retry.max_retry_attempts = num;
            }
        }

        if let Ok(val) = std::env::var("DISCOVERY_RPM") {
            if let Ok(rpm) = val.parse() {
                config
                    .rate_limits
                    .entry(DISCOVERY_SERVICE.to_string())
                    .or_default()
                    .requests_per_minute = rpm;
            }
        }

        if let Ok(val) = std::env::var("GENERATION_RPM") {
            if let Ok(rpm) = val.parse() {
                config
                    .rate_limits
                    .entry(GENERATION_SERVICE.to_string())
                    .or_default()
                    .requests_per_minute = rpm;
            }
        }

        if let Ok(val) = std::env::var("LOG_JSON") {
            config.logging.json = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.retry.validate()?;

        for (service, limit) in &self.rate_limits {
            if limit.requests_per_minute == 0 {
                return Err(PipelineError::Configuration(format!(
                    "rate_limits.{}.requests_per_minute must be at least 1",
                    service
                )));
            }
            if limit.daily_limit == Some(0) {
                return Err(PipelineError::Configuration(format!(
                    "rate_limits.{}.daily_limit must be at least 1 when set",
                    service
                )));
            }
        }

        Ok(())
    }

    /// Rate limit for a service, falling back to the default ceiling
    pub fn rate_limit_for(&self, service: &str) -> RateLimitConfig {
        self.rate_limits.get(service).cloned().unwrap_or_default()
    }
}

/// Orchestrator sizing and budget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Skills per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches processed in parallel
    #[serde(default = "default_worker_pool_width")]
    pub worker_pool_width: usize,

    /// Concurrent discovery calls within one batch
    #[serde(default = "default_discovery_concurrency")]
    pub discovery_concurrency: usize,

    /// Token ceiling for the context of one generation call
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Minimum trimmed content length for a context to be used
    #[serde(default = "default_min_context_chars")]
    pub min_context_chars: usize,

    /// Event stream buffer; a full buffer throttles the workers
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Delay between admitting consecutive batches
    #[serde(default)]
    pub batch_stagger_ms: u64,

    /// Upper bound for a single external call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_batch_size() -> usize {
    3
}

fn default_worker_pool_width() -> usize {
    3
}

fn default_discovery_concurrency() -> usize {
    3
}

fn default_token_budget() -> usize {
    50_000
}

fn default_min_context_chars() -> usize {
    50
}

fn default_event_buffer() -> usize {
    64
}

fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            worker_pool_width: default_worker_pool_width(),
            discovery_concurrency: default_discovery_concurrency(),
            token_budget: default_token_budget(),
            min_context_chars: default_min_context_chars(),
            event_buffer: default_event_buffer(),
            batch_stagger_ms: 0,
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        let checks = [
            ("batch_size", self.batch_size),
            ("worker_pool_width", self.worker_pool_width),
            ("discovery_concurrency", self.discovery_concurrency),
            ("token_budget", self.token_budget),
            ("event_buffer", self.event_buffer),
        ];

        for (name, value) in checks {
            if value == 0 {
                return Err(PipelineError::Configuration(format!(
                    "pipeline.{} must be at least 1",
                    name
                )));
            }
        }

        if self.call_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "pipeline.call_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Get batch stagger as Duration
    pub fn batch_stagger(&self) -> Duration {
        Duration::from_millis(self.batch_stagger_ms)
    }

    /// Get call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Backoff-and-retry settings shared by both services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound of the uniform jitter added to each delay
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PipelineError::Configuration(format!(
                "retry.backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(PipelineError::Configuration(format!(
                "retry.backoff_max_ms ({}) is below retry.backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }
}

/// Admission ceiling for one external service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Rolling 24h quota; exhausting it degrades the service
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

fn default_requests_per_minute() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            daily_limit: None,
        }
    }
}

fn default_rate_limits() -> HashMap<String, RateLimitConfig> {
    let mut limits = HashMap::new();
    limits.insert(
        DISCOVERY_SERVICE.to_string(),
        RateLimitConfig {
            requests_per_minute: 15,
            daily_limit: None,
        },
    );
    limits.insert(
        GENERATION_SERVICE.to_string(),
        RateLimitConfig {
            requests_per_minute: 20,
            daily_limit: None,
        },
    );
    limits
}

/// Token estimator used when a provider reports content without a token count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    Chars,
    Words,
    Tiktoken,
}

impl Default for EstimatorKind {
    fn default() -> Self {
        Self::Chars
    }
}

/// HTTP providers for the two external capabilities
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_discovery_provider")]
    pub discovery: ProviderConfig,

    #[serde(default)]
    pub generation: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            discovery: default_discovery_provider(),
            generation: ProviderConfig::default(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Explicit key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub estimator: EstimatorKind,
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.3
}

fn default_provider_timeout_secs() -> u64 {
    90
}

fn default_discovery_provider() -> ProviderConfig {
    ProviderConfig {
        max_tokens: 2048,
        temperature: 0.2,
        ..ProviderConfig::default()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_provider_timeout_secs(),
            estimator: EstimatorKind::default(),
        }
    }
}

impl ProviderConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from config or the configured environment variable
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        self.api_key.clone().or_else(|| {
            std::env::var(&self.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(SecretString::new)
        })
    }
}

/// Logging output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.batch_size, 3);
        assert_eq!(config.pipeline.token_budget, 50_000);
        assert_eq!(config.retry.max_retry_attempts, 3);
    }

    #[test]
    fn test_default_rate_limits_cover_both_services() {
        let config = Config::default();
        assert_eq!(config.rate_limit_for(DISCOVERY_SERVICE).requests_per_minute, 15);
        assert_eq!(config.rate_limit_for(GENERATION_SERVICE).requests_per_minute, 20);
        assert_eq!(config.rate_limit_for("unknown").requests_per_minute, 60);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.pipeline.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = Config::default();
        config.rate_limits.insert(
            GENERATION_SERVICE.to_string(),
            RateLimitConfig {
                requests_per_minute: 0,
                daily_limit: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shrinking_multiplier_rejected() {
        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = std::env::temp_dir();
        file.push(format!("interview-pipeline-{}.toml", uuid::Uuid::new_v4()));

        let mut handle = std::fs::File::create(&file).unwrap();
        writeln!(
            handle,
            r#"
            [pipeline]
            batch_size = 5
            token_budget = 40000

            [retry]
            max_retry_attempts = 2
            backoff_base_ms = 200

            [rate_limits.discovery]
            requests_per_minute = 10
            daily_limit = 20

            [providers.generation]
            model = "test-model"
            estimator = "words"
            "#
        )
        .unwrap();

        let config = Config::from_file(&file).unwrap();
        std::fs::remove_file(&file).ok();

        assert_eq!(config.pipeline.batch_size, 5);
        assert_eq!(config.pipeline.token_budget, 40_000);
        assert_eq!(config.pipeline.worker_pool_width, 3);
        assert_eq!(config.retry.max_retry_attempts, 2);
        assert_eq!(config.retry.backoff_base_ms, 200);
        assert_eq!(config.rate_limit_for(DISCOVERY_SERVICE).daily_limit, Some(20));
        assert_eq!(config.providers.generation.model, "test-model");
        assert_eq!(config.providers.generation.estimator, EstimatorKind::Words);
    }

    #[test]
    fn test_duration_conversions() {
        let config = PipelineConfig::default();
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.batch_stagger(), Duration::ZERO);
    }
}
