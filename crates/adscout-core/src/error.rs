use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Where a rate-limit signal came from.
///
/// An HTTP 429 has already been retried with exponential backoff by the
/// resilient client; a JSON-embedded upstream signal benches the credential
/// for a fixed cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSource {
    /// HTTP status 429 that survived every retry.
    Http,
    /// Error object in the upstream JSON body (`code` 4/17/32/613/80004 or a
    /// "rate limit" message) returned with a non-429 status.
    Upstream,
}

impl fmt::Display for RateLimitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitSource::Http => write!(f, "http"),
            RateLimitSource::Upstream => write!(f, "upstream"),
        }
    }
}

/// Application-wide error types for adscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request or unusable response that is not a transport failure.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error. Transient.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Upstream asked us to slow down. Triggers rotation and backoff, not failure.
    #[error("Rate limited ({origin}), cooldown {}s", cooldown.as_secs())]
    RateLimited {
        origin: RateLimitSource,
        cooldown: Duration,
    },

    /// Non-retryable upstream rejection (4xx other than rate limiting).
    #[error("Upstream error (HTTP {status_code}, code {code:?}): {message}")]
    UpstreamError {
        status_code: u16,
        code: Option<i64>,
        message: String,
    },

    /// Upstream refused the requested page size.
    #[error("Page size {limit} rejected by upstream")]
    PageSizeTooLarge { limit: u32 },

    /// The circuit for this host is open; no network call was attempted.
    #[error("Circuit for '{host}' is open. Retry after {} seconds.", retry_after.as_secs())]
    CircuitOpen { host: String, retry_after: Duration },

    /// Every credential is cooling down.
    #[error("All credentials rate limited, next available in {}s", retry_after.as_secs())]
    CredentialsExhausted { retry_after: Duration },

    /// No credential configured at all.
    #[error("No API credentials configured")]
    NoCredentials,

    /// A phase produced no usable output; the job ends as `no_results`.
    #[error("Phase {phase} produced no usable output: {reason}")]
    PhaseUnrecoverable { phase: u8, reason: String },

    /// Cooperative cancellation observed at a phase boundary.
    #[error("Job cancelled")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input from a caller of the control plane.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimited { .. }
            | AppError::PageSizeTooLarge { .. }
            | AppError::CredentialsExhausted { .. } => true,
            AppError::UpstreamError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Returns true if this error is evidence that the remote service is unhealthy.
    ///
    /// Client errors and rate limits handled by rotation never trip a circuit.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::UpstreamError { status_code, .. } => *status_code >= 500,
            AppError::RateLimited { origin, .. } => *origin == RateLimitSource::Http,
            _ => false,
        }
    }

    /// Error message clipped to `max_chars`, for persisting on failed jobs.
    pub fn truncated_message(&self, max_chars: usize) -> String {
        let message = self.to_string();
        match message.char_indices().nth(max_chars) {
            Some((idx, _)) => message[..idx].to_string(),
            None => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(
            AppError::RateLimited {
                origin: RateLimitSource::Upstream,
                cooldown: Duration::from_secs(60),
            }
            .is_retryable()
        );
        assert!(AppError::PageSizeTooLarge { limit: 500 }.is_retryable());
        assert!(
            !AppError::UpstreamError {
                status_code: 404,
                code: None,
                message: "missing".into(),
            }
            .is_retryable()
        );
        assert!(!AppError::NoCredentials.is_retryable());
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(
            AppError::UpstreamError {
                status_code: 503,
                code: None,
                message: "unavailable".into(),
            }
            .should_trip_circuit()
        );
        assert!(
            !AppError::UpstreamError {
                status_code: 400,
                code: Some(100),
                message: "bad param".into(),
            }
            .should_trip_circuit()
        );
        assert!(
            !AppError::RateLimited {
                origin: RateLimitSource::Upstream,
                cooldown: Duration::from_secs(60),
            }
            .should_trip_circuit()
        );
    }

    #[test]
    fn test_truncated_message() {
        let err = AppError::Generic("x".repeat(800));
        assert_eq!(err.truncated_message(500).len(), 500);
        assert_eq!(AppError::Generic("short".into()).truncated_message(500), "short");
    }

    #[test]
    fn test_truncated_message_respects_char_boundaries() {
        let err = AppError::Generic("é".repeat(10));
        assert_eq!(err.truncated_message(3), "ééé");
    }
}
