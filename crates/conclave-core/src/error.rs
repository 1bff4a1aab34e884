//! Error types for conclave-core
//!
//! This module provides the core error type and user-facing formatting.

use thiserror::Error;

/// Visible marker prefixed to failures embedded in conversation text
pub const WARNING_MARKER: &str = "⚠️";

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The turn or queue was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Agent invocation error
    #[error("agent error: {0}")]
    Agent(#[from] conclave_agents::Error),

    /// Tool or command error
    #[error("tool error: {0}")]
    Tool(#[from] conclave_tools::Error),

    /// Task store error
    #[error("store error: {0}")]
    Store(String),

    /// Task failed validation
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error (serialization, state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came from a cancellation signal, at any layer
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Agent(e) => e.is_cancelled(),
            Error::Tool(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {}", e))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Human-readable error messages and hints
pub trait UserFriendlyError {
    /// Message shown to the user
    fn user_message(&self) -> String;

    /// How to fix it, when known
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Cancelled => "⏹️ Cancelled.".to_string(),
            Error::Agent(conclave_agents::Error::Timeout(secs)) => {
                format!("⏳ The agent did not answer within {} seconds.", secs)
            }
            Error::Agent(e) => format!("🤖 Agent error: {}", e),
            Error::Tool(e) => format!("🔧 Tool error: {}", e),
            Error::Store(msg) => format!("💾 Task store error: {}", msg),
            Error::InvalidTask(msg) => format!("📋 Invalid task: {}", msg),
            Error::Configuration(msg) => format!("⚙️ Configuration error: {}", msg),
            Error::Internal(msg) => format!("❌ Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Agent(conclave_agents::Error::AgentNotFound(_)) => {
                Some("💡 Check the [[agents]] entries and `main_agent` in your config.".to_string())
            }
            Error::Agent(conclave_agents::Error::Unavailable { .. }) => Some(
                "💡 Install the agent's CLI or set `command` to its full path.".to_string(),
            ),
            Error::Agent(conclave_agents::Error::Timeout(_)) => {
                Some("💡 Raise `timeout_secs` for this agent.".to_string())
            }
            Error::Configuration(_) => {
                Some("💡 Check config/default.toml, config/local.toml and CONCLAVE_* variables.".to_string())
            }
            Error::Store(_) => Some("💡 Check that `queue.db_path` is writable.".to_string()),
            _ => None,
        }
    }
}

/// Format an error for the REPL
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    if let Some(suggestion) = error.suggestion() {
        output.push('\n');
        output.push_str(&suggestion);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_cancelled_through_layers() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Agent(conclave_agents::Error::Cancelled).is_cancelled());
        assert!(Error::Tool(conclave_tools::Error::Cancelled).is_cancelled());
        assert!(!Error::Tool(conclave_tools::Error::Timeout(5)).is_cancelled());
        assert!(!Error::Internal("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_cli_formatting() {
        let error = Error::Agent(conclave_agents::Error::AgentNotFound("helper".to_string()));
        let text = format_error_for_cli(&error);
        assert!(text.contains("helper"));
        assert!(text.contains("main_agent"));

        let error = Error::Agent(conclave_agents::Error::Timeout(30));
        assert!(error.user_message().contains("30 seconds"));
    }
}
