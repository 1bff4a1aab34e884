//! Normalized agent events
//!
//! Every vendor stream is translated into the same [`AgentEvent`] sequence.
//! Events are produced per raw line and consumed immediately by observers;
//! they are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse lifecycle phase of an agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    /// Backend session started
    Boot,
    /// Agent is thinking or planning
    Analysis,
    /// Agent is streaming reply text
    Responding,
    /// A shell-like command is running
    Command,
    /// A file edit is being prepared or applied
    Editing,
    /// A non-shell tool is running
    Tool,
    /// The invocation finished successfully
    Completed,
    /// The invocation failed
    Error,
}

impl AgentPhase {
    /// Whether this phase ends the invocation
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentPhase::Completed | AgentPhase::Error)
    }
}

/// Lifecycle marker of a normalized item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Item started
    #[serde(rename = "item.started")]
    Started,
    /// Item progressed
    #[serde(rename = "item.updated")]
    Updated,
    /// Item finished
    #[serde(rename = "item.completed")]
    Completed,
}

/// Progress state of a normalized item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Still running
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

/// Kind of change applied to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File created
    Add,
    /// File modified
    Update,
    /// File removed
    Delete,
}

/// One file touched by an edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path as reported by the backend
    pub path: String,
    /// Change kind
    pub kind: ChangeKind,
}

/// Typed item carried in [`ItemEnvelope`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadItem {
    /// Assistant reply text
    AgentMessage {
        /// Item id
        id: String,
        /// Cumulative text
        text: String,
    },
    /// Reasoning summary
    Reasoning {
        /// Item id
        id: String,
        /// Reasoning text
        text: String,
    },
    /// Shell-like command
    CommandExecution {
        /// Item id
        id: String,
        /// Command line
        command: String,
        /// stdout and stderr folded together
        aggregated_output: String,
        /// Exit code, once known
        exit_code: Option<i32>,
        /// Progress state
        status: ItemStatus,
    },
    /// File edit
    FileChange {
        /// Item id
        id: String,
        /// Touched files
        changes: Vec<FileChange>,
        /// Progress state
        status: ItemStatus,
    },
    /// Any other tool or capability
    ToolCall {
        /// Item id
        id: String,
        /// Tool name
        tool: String,
        /// Arguments as sent by the agent
        arguments: Value,
        /// Tool output, once known
        output: Option<String>,
        /// Progress state
        status: ItemStatus,
    },
    /// Backend-reported error
    Error {
        /// Item id
        id: String,
        /// Error message
        message: String,
    },
}

/// Normalized envelope (`{"type": "item.started", "item": {...}}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEnvelope {
    /// Lifecycle marker
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// The item itself
    pub item: ThreadItem,
}

impl ItemEnvelope {
    /// Create an envelope
    pub fn new(kind: EnvelopeKind, item: ThreadItem) -> Self {
        Self { kind, item }
    }
}

/// A single normalized event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Lifecycle phase
    pub phase: AgentPhase,
    /// Short human-readable title
    pub title: String,
    /// Optional detail line (command, path, error text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// For [`AgentPhase::Responding`], the full text accumulated so far.
    /// Consumers replace their copy, they never append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Normalized item envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<ItemEnvelope>,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    /// Create an event stamped with the current time
    pub fn new(phase: AgentPhase, title: impl Into<String>) -> Self {
        Self {
            phase,
            title: title.into(),
            detail: None,
            delta: None,
            raw: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a detail line
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach cumulative text
    #[must_use]
    pub fn with_delta(mut self, delta: impl Into<String>) -> Self {
        self.delta = Some(delta.into());
        self
    }

    /// Attach a normalized envelope
    #[must_use]
    pub fn with_raw(mut self, kind: EnvelopeKind, item: ThreadItem) -> Self {
        self.raw = Some(ItemEnvelope::new(kind, item));
        self
    }
}

/// Token accounting reported by a backend's terminal message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
    /// Prompt tokens served from cache
    pub cached_input_tokens: u64,
}

impl TokenUsage {
    /// Total tokens (input + output)
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Add another usage record into this one
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let event = AgentEvent::new(AgentPhase::Command, "Running command").with_raw(
            EnvelopeKind::Started,
            ThreadItem::CommandExecution {
                id: "t1".to_string(),
                command: "ls".to_string(),
                aggregated_output: String::new(),
                exit_code: None,
                status: ItemStatus::InProgress,
            },
        );

        let json = serde_json::to_value(event.raw.unwrap()).unwrap();
        assert_eq!(json["type"], "item.started");
        assert_eq!(json["item"]["type"], "command_execution");
        assert_eq!(json["item"]["status"], "in_progress");
        assert!(json["item"]["exit_code"].is_null());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&AgentPhase::Responding).unwrap();
        assert_eq!(json, "\"responding\"");
        assert!(AgentPhase::Error.is_terminal());
        assert!(!AgentPhase::Tool.is_terminal());
    }

    #[test]
    fn test_usage_accumulate() {
        let mut usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: 2,
        };
        usage.accumulate(&TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
            cached_input_tokens: 0,
        });
        assert_eq!(usage.total(), 17);
        assert_eq!(usage.cached_input_tokens, 2);
    }
}
