use thiserror::Error;

use crate::core::Service;

/// Failure modes of a single intelligence source.
///
/// `Display` is the human-readable message surfaced in reports and API
/// responses, so every variant names the provider it came from.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("{0} is not configured")]
    NotConfigured(Service),

    #[error("{provider}: API key rejected by upstream")]
    Unauthorized { provider: String },

    #[error("{provider}: resource not found")]
    NotFound { provider: String },

    #[error("{provider}: rate limited by upstream, {}", retry_hint(.retry_after))]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("{provider}: upstream returned HTTP {status}: {message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider}: request timed out")]
    Timeout { provider: String },

    #[error("{provider}: connection failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider}: unexpected response shape: {message}")]
    Decode { provider: String, message: String },

    #[error("{provider}: scan {scan_id} failed: {message}")]
    JobFailed {
        provider: String,
        scan_id: String,
        message: String,
    },

    #[error("{provider}: scan {scan_id} did not finish after {attempts} status checks")]
    PollTimeout {
        provider: String,
        scan_id: String,
        attempts: u32,
    },

    #[error("scan cancelled")]
    Cancelled,
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!("retry in {}s", secs),
        None => "try again later".to_string(),
    }
}

impl SourceError {
    /// Errors worth another status check while a job is being polled.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. }
            | SourceError::Timeout { .. }
            | SourceError::Transport { .. } => true,
            SourceError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message() {
        let err = SourceError::RateLimited {
            provider: "leaks".into(),
            retry_after: Some(30),
        };
        assert_eq!(err.to_string(), "leaks: rate limited by upstream, retry in 30s");

        let err = SourceError::RateLimited {
            provider: "host".into(),
            retry_after: None,
        };
        assert!(err.to_string().contains("rate limited"));
        assert!(err.to_string().ends_with("try again later"));
    }

    #[test]
    fn test_retryable_classification() {
        let server_side = SourceError::Upstream {
            provider: "ports".into(),
            status: 503,
            message: "busy".into(),
        };
        let client_side = SourceError::Upstream {
            provider: "ports".into(),
            status: 400,
            message: "bad target".into(),
        };
        assert!(server_side.is_retryable());
        assert!(!client_side.is_retryable());
        assert!(!SourceError::Unauthorized { provider: "x".into() }.is_retryable());
        assert!(!SourceError::Cancelled.is_retryable());
    }
}
