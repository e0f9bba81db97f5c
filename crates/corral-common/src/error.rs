//! Common error types for Corral components.

use thiserror::Error;

/// Common errors across Corral components
#[derive(Debug, Error)]
pub enum CorralError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote node unreachable or timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote node answered with something we cannot parse
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Caller lacks the required identity or permission
    #[error("Permission denied: {0}")]
    Authorization(String),

    /// A concurrent writer published a newer config version
    #[error("Configuration conflict: {0}")]
    Conflict(String),

    /// Remote node runs a protocol revision without the endpoint
    #[error("Not supported by remote: {0}")]
    VersionIncompatibility(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CorralError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Storage(_) => 500,
            Self::Transport(_) => 503,
            Self::Protocol(_) => 502,
            Self::Authorization(_) => 403,
            Self::Conflict(_) => 400,
            Self::VersionIncompatibility(_) => 400,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Conflict(_))
    }
}
