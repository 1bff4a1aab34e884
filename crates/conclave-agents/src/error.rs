//! Error types for conclave-agents

use thiserror::Error;

/// Agent invocation error
#[derive(Debug, Error)]
pub enum Error {
    /// No agent registered under this id
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    /// Agent is registered but cannot run (missing executable, disabled)
    #[error("agent '{agent_id}' unavailable: {reason}")]
    Unavailable {
        /// Agent id
        agent_id: String,
        /// Why it cannot run
        reason: String,
    },

    /// Backend process could not be started
    #[error("failed to spawn backend: {0}")]
    Spawn(String),

    /// The stream itself reported a terminal failure
    #[error("agent '{agent_id}' failed: {message}")]
    Backend {
        /// Agent id
        agent_id: String,
        /// Error reported by the backend
        message: String,
    },

    /// Process exited unsuccessfully without producing a reply
    #[error("agent '{agent_id}' exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ExitStatus {
        /// Agent id
        agent_id: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured stderr (truncated)
        stderr: String,
    },

    /// Invocation exceeded its time limit
    #[error("agent timed out after {0}s")]
    Timeout(u64),

    /// Invocation was cancelled
    #[error("agent invocation cancelled")]
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
