//! Per-vendor stream parsers
//!
//! Each backend CLI speaks its own line-delimited JSON dialect. A parser is a
//! small state machine that consumes one decoded line at a time and returns the
//! normalized [`AgentEvent`]s for it. Adding a vendor means adding a parser;
//! nothing above this layer changes.

mod claude;
mod codex;
mod gemini;
pub mod state;

#[cfg(test)]
mod tests;

pub use claude::ClaudeStreamParser;
pub use codex::CodexStreamParser;
pub use gemini::GeminiStreamParser;

use crate::events::{AgentEvent, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Stateful translator from a vendor stream to [`AgentEvent`]s
pub trait StreamParser: Send {
    /// Vendor this parser understands
    fn vendor(&self) -> Vendor;

    /// Translate one decoded line. Unknown shapes yield no events.
    fn parse_line(&mut self, line: &Value) -> Vec<AgentEvent>;

    /// Translate one raw stdout line; blank or non-JSON lines are ignored
    fn parse_raw(&mut self, line: &str) -> Vec<AgentEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => self.parse_line(&value),
            Err(e) => {
                debug!(vendor = %self.vendor(), error = %e, "Skipping non-JSON line");
                Vec::new()
            }
        }
    }

    /// Backend session id, once announced
    fn session_id(&self) -> Option<&str>;

    /// Final reply text, once the stream has settled
    fn final_message(&self) -> Option<String>;

    /// Terminal error reported by the stream, if any
    fn last_error(&self) -> Option<&str>;

    /// Token usage reported by the terminal line, if any
    fn usage(&self) -> Option<TokenUsage>;
}

/// Supported backend vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// Claude Code (`--output-format stream-json`)
    Claude,
    /// Codex (`exec --json`)
    Codex,
    /// Gemini CLI (`--output-format stream-json`)
    Gemini,
}

impl Vendor {
    /// Fresh parser for one invocation
    pub fn parser(self) -> Box<dyn StreamParser> {
        match self {
            Vendor::Claude => Box::new(ClaudeStreamParser::new()),
            Vendor::Codex => Box::new(CodexStreamParser::new()),
            Vendor::Gemini => Box::new(GeminiStreamParser::new()),
        }
    }

    /// Default executable name
    pub fn default_command(self) -> &'static str {
        match self {
            Vendor::Claude => "claude",
            Vendor::Codex => "codex",
            Vendor::Gemini => "gemini",
        }
    }

    /// Default arguments; `{prompt}` is replaced by the prompt text
    pub fn default_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Vendor::Claude => &[
                "--print",
                "--output-format",
                "stream-json",
                "--verbose",
                "{prompt}",
            ],
            Vendor::Codex => &["exec", "--json", "--skip-git-repo-check", "{prompt}"],
            Vendor::Gemini => &["--output-format", "stream-json", "--prompt", "{prompt}"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }

    /// Default arguments used to resume a session; `{session}` is replaced
    pub fn default_resume_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Vendor::Claude => &[
                "--print",
                "--output-format",
                "stream-json",
                "--verbose",
                "--resume",
                "{session}",
                "{prompt}",
            ],
            Vendor::Codex => &[
                "exec",
                "--json",
                "--skip-git-repo-check",
                "resume",
                "{session}",
                "{prompt}",
            ],
            Vendor::Gemini => &[],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Vendor::Claude => "claude",
            Vendor::Codex => "codex",
            Vendor::Gemini => "gemini",
        })
    }
}

impl std::str::FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(Vendor::Claude),
            "codex" => Ok(Vendor::Codex),
            "gemini" => Ok(Vendor::Gemini),
            other => Err(format!("unknown vendor '{}'", other)),
        }
    }
}
