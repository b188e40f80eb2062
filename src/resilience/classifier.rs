//! Structured service errors and their failure classes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Provider error codes that mean a hard quota or billing limit
const QUOTA_PROVIDER_CODES: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "insufficient_quota",
    "quota_exceeded",
    "billing_hard_limit_reached",
];

/// Machine-readable error code reported by an external capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    QuotaExhausted,
    Unauthenticated,
    PermissionDenied,
    Unavailable,
    RateLimited,
    Timeout,
    Internal,
    InvalidRequest,
    MalformedResponse,
    Unknown,
}

impl ErrorCode {
    /// Map an HTTP status and optional provider error code.
    ///
    /// A known quota code wins over the status, so a 429 carrying
    /// `insufficient_quota` is a quota failure rather than a rate limit.
    pub fn from_http_status(status: u16, provider_code: Option<&str>) -> Self {
        if let Some(code) = provider_code {
            if QUOTA_PROVIDER_CODES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(code))
            {
                return Self::QuotaExhausted;
            }
        }

        match status {
            401 => Self::Unauthenticated,
            402 => Self::QuotaExhausted,
            403 => Self::PermissionDenied,
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            400 | 404 | 413 | 422 => Self::InvalidRequest,
            502 | 503 => Self::Unavailable,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaExhausted => "quota_exhausted",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::InvalidRequest => "invalid_request",
            Self::MalformedResponse => "malformed_response",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a discovery or generation call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
    /// Provider hint for when to try again
    pub retry_after: Option<Duration>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// How the pipeline reacts to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Degrades the service for the rest of the run
    Fatal,
    /// Retried with backoff
    Transient,
    /// Fails the affected skills only
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Single classification boundary for service errors.
///
/// Decisions depend on the error code only, never on message text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(&self, error: &ServiceError) -> FailureClass {
        match error.code {
            ErrorCode::QuotaExhausted | ErrorCode::Unauthenticated | ErrorCode::PermissionDenied => {
                FailureClass::Fatal
            }
            ErrorCode::Unavailable
            | ErrorCode::RateLimited
            | ErrorCode::Timeout
            | ErrorCode::Internal => FailureClass::Transient,
            ErrorCode::InvalidRequest | ErrorCode::MalformedResponse | ErrorCode::Unknown => {
                FailureClass::Permanent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: ErrorCode) -> FailureClass {
        ErrorClassifier.classify(&ServiceError::new(code, "boom"))
    }

    #[test]
    fn test_classification_by_code() {
        assert_eq!(classify(ErrorCode::QuotaExhausted), FailureClass::Fatal);
        assert_eq!(classify(ErrorCode::Unauthenticated), FailureClass::Fatal);
        assert_eq!(classify(ErrorCode::PermissionDenied), FailureClass::Fatal);
        assert_eq!(classify(ErrorCode::Unavailable), FailureClass::Transient);
        assert_eq!(classify(ErrorCode::RateLimited), FailureClass::Transient);
        assert_eq!(classify(ErrorCode::Timeout), FailureClass::Transient);
        assert_eq!(classify(ErrorCode::Internal), FailureClass::Transient);
        assert_eq!(classify(ErrorCode::InvalidRequest), FailureClass::Permanent);
        assert_eq!(classify(ErrorCode::MalformedResponse), FailureClass::Permanent);
        assert_eq!(classify(ErrorCode::Unknown), FailureClass::Permanent);
    }

    #[test]
    fn test_message_text_is_ignored() {
        let error = ServiceError::new(ErrorCode::RateLimited, "daily quota billing limit exceeded");
        assert_eq!(ErrorClassifier.classify(&error), FailureClass::Transient);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::from_http_status(401, None), ErrorCode::Unauthenticated);
        assert_eq!(ErrorCode::from_http_status(403, None), ErrorCode::PermissionDenied);
        assert_eq!(ErrorCode::from_http_status(429, None), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_http_status(503, None), ErrorCode::Unavailable);
        assert_eq!(ErrorCode::from_http_status(500, None), ErrorCode::Internal);
        assert_eq!(ErrorCode::from_http_status(504, None), ErrorCode::Timeout);
        assert_eq!(ErrorCode::from_http_status(400, None), ErrorCode::InvalidRequest);
        assert_eq!(ErrorCode::from_http_status(302, None), ErrorCode::Unknown);
    }

    #[test]
    fn test_known_quota_codes_override_status() {
        assert_eq!(
            ErrorCode::from_http_status(429, Some("insufficient_quota")),
            ErrorCode::QuotaExhausted
        );
        assert_eq!(
            ErrorCode::from_http_status(429, Some("RESOURCE_EXHAUSTED")),
            ErrorCode::QuotaExhausted
        );
        assert_eq!(
            ErrorCode::from_http_status(429, Some("rate_limit_exceeded")),
            ErrorCode::RateLimited
        );
    }

    #[test]
    fn test_display_includes_code() {
        let error = ServiceError::new(ErrorCode::Timeout, "deadline passed");
        assert_eq!(error.to_string(), "timeout: deadline passed");
    }
}
