//! Admission control, failure classification and retry for external calls

pub mod classifier;
pub mod health;
pub mod rate_limiter;
pub mod retry;

pub use classifier::{ErrorClassifier, ErrorCode, FailureClass, ServiceError};
pub use health::{ServiceHealth, ServiceKind};
pub use rate_limiter::{QuotaExhausted, RateLimiter, RateLimiters};
pub use retry::{CallFailure, RetryExecutor, RetryPolicy};
