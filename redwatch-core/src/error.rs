use std::time::Duration;
use thiserror::Error;

/// Errors raised by the scraping and API backends.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("access forbidden: {resource}")]
    Forbidden { resource: String },

    #[error("request timeout")]
    RequestTimeout,

    #[error("server error (status {status_code})")]
    ServerError { status_code: u16 },

    #[error("scraping failed: {message}")]
    Scraping {
        message: String,
        status_code: Option<u16>,
    },

    #[error("invalid response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {field}")]
    MissingValue { field: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("data source error: {0}")]
    Source(#[from] SourceError),

    /// Both backends of the unified source failed for one operation.
    #[error("all data sources failed; api: {api}; scraping: {scraping}")]
    DataSource { api: String, scraping: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Internal(String),
}

/// Substrings that mark an error as a candidate for backend fallback.
const FALLBACK_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "401",
    "403",
    "auth",
    "connection",
    "timeout",
    "network",
];

impl CoreError {
    /// Whether retrying the same backend may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Source(e) => matches!(
                e,
                SourceError::RateLimitExceeded { .. }
                    | SourceError::RequestTimeout
                    | SourceError::ServerError { .. }
            ),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt, when one was given.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Source(SourceError::RateLimitExceeded { retry_after }) => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    /// Whether this error is one of the classes that justify switching to
    /// the alternate backend (rate limiting, auth, transport trouble).
    pub fn is_fallback_error(&self) -> bool {
        let rendered = self.to_string().to_lowercase();
        FALLBACK_MARKERS.iter().any(|m| rendered.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_retryable_with_delay() {
        let err = CoreError::Source(SourceError::RateLimitExceeded { retry_after: 60 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert!(err.is_fallback_error());
    }

    #[test]
    fn auth_errors_are_fallback_but_not_retryable() {
        let err = CoreError::Source(SourceError::AuthenticationFailed {
            reason: "bad credentials".into(),
        });
        assert!(!err.is_retryable());
        assert!(err.is_fallback_error());
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = CoreError::Source(SourceError::ServerError { status_code: 502 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn parse_errors_do_not_trigger_fallback_markers() {
        let err = CoreError::Source(SourceError::InvalidResponse {
            details: "missing field `kind`".into(),
        });
        assert!(!err.is_fallback_error());
    }
}
