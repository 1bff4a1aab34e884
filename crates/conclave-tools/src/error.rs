//! Error types for conclave-tools

use thiserror::Error;

/// Tool error type
#[derive(Debug, Error)]
pub enum Error {
    /// Tool not found
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Process could not be started
    #[error("execution failed: {0}")]
    Execution(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Executable outside the allowlist
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Cancelled by the caller
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from a cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
