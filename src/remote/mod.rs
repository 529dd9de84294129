//! Remote client - drive execution servers on other machines

pub mod client;
pub mod registry;
pub mod retry;

pub use client::{PollOptions, RemoteClient, DEFAULT_POLL_INTERVAL, DEFAULT_MAX_POLL_FAILURES};
pub use registry::{RemoteConfig, RemoteRegistry, REMOTES_KEY};
pub use retry::RetryPolicy;

use crate::persistence::StoreError;
use crate::protocol::AuthError;
use thiserror::Error;

/// Error types for remote operations
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Unknown remote '{0}'")]
    UnknownRemote(String),

    #[error("Remote rejected credentials: {0}")]
    Auth(String),

    #[error("Remote unreachable: {0}")]
    Transient(String),

    #[error("Remote returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response from remote: {0}")]
    Decode(String),

    #[error("Remote registry error: {0}")]
    Registry(#[from] StoreError),

    #[error("Invalid remote: {0}")]
    Validation(String),
}

impl RemoteError {
    /// Whether another attempt might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transient(_) => true,
            RemoteError::Http { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

impl From<AuthError> for RemoteError {
    fn from(e: AuthError) -> Self {
        RemoteError::Auth(e.to_string())
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            RemoteError::Transient(e.to_string())
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RemoteError::Transient(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Transient("refused".into()).is_transient());
        for status in [502, 503, 504] {
            assert!(RemoteError::Http { status, message: String::new() }.is_transient());
        }
        assert!(!RemoteError::Http { status: 500, message: String::new() }.is_transient());
        assert!(!RemoteError::Auth("bad signature".into()).is_transient());
        assert!(!RemoteError::Http { status: 404, message: String::new() }.is_transient());
    }
}
