//! Error taxonomy for target adapters.
//!
//! Variants are organized by cause, not transport layer, so the executor
//! can decide retryability without caring about HTTP specifics.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Could not establish a connection (refused, DNS failure).
    #[error("connection failed: {0}")]
    Connection(String),

    /// A single request exceeded its budget.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Transient transport failure: 5xx, 429, or a dropped socket.
    #[error("transport error: {message}")]
    Transport { message: String, status: Option<u16> },

    /// The target answered with a non-retryable client error.
    #[error("protocol error (HTTP {status}): {message}")]
    Protocol { message: String, status: u16 },

    /// The target's payload could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// The target rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Adapter-side configuration problem (bad URL, unresolved env var).
    #[error("configuration error: {0}")]
    Config(String),
}

impl AdapterError {
    /// Whether the adapter's retry loop may try again. One engine item
    /// attempt stays one adapter call either way; retries live here only.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Transport { status, .. } => match status {
                Some(429) => true,
                Some(code) => *code >= 500,
                None => true,
            },
            Self::Protocol { .. } | Self::Parse(_) | Self::Auth(_) | Self::Config(_) => false,
        }
    }

    /// Short code for logging and result metadata.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Transport { .. } => "transport",
            Self::Protocol { .. } => "protocol",
            Self::Parse(_) => "parse",
            Self::Auth(_) => "auth",
            Self::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(Duration::from_secs(0));
        }
        if err.is_connect() {
            return Self::Connection(err.to_string());
        }
        Self::Transport {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(AdapterError::Connection("refused".into()).is_retryable());
        assert!(AdapterError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(AdapterError::Transport {
            message: "502".into(),
            status: Some(502)
        }
        .is_retryable());
        assert!(AdapterError::Transport {
            message: "too many requests".into(),
            status: Some(429)
        }
        .is_retryable());
        assert!(!AdapterError::Protocol {
            message: "bad request".into(),
            status: 400
        }
        .is_retryable());
        assert!(!AdapterError::Parse("not json".into()).is_retryable());
        assert!(!AdapterError::Auth("expired key".into()).is_retryable());
        assert!(!AdapterError::Config("no url".into()).is_retryable());
    }
}
