//! State shared by every vendor parser
//!
//! Vendors differ in how they frame messages and tool calls, but the rules for
//! turning them into events are the same: text accumulates per message id,
//! tool starts pair with results by id, and a terminal line settles the final
//! message or the last error.

use crate::events::{
    AgentEvent, AgentPhase, ChangeKind, EnvelopeKind, FileChange, ItemStatus, ThreadItem,
    TokenUsage,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How a tool call is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Shell-like command (`command` phase)
    Shell,
    /// File edit (`editing` phase)
    Edit,
    /// Anything else (`tool` phase)
    Other,
}

/// A tool call that has started but not finished
#[derive(Debug, Clone)]
pub struct PendingTool {
    /// Vendor tool name
    pub name: String,
    /// Classification
    pub kind: ToolKind,
    /// Tool arguments
    pub arguments: Value,
    /// Command line, for shell tools
    pub command: Option<String>,
    /// Touched paths, for edit tools
    pub paths: Vec<String>,
}

impl PendingTool {
    /// Create a pending call with no command or paths
    pub fn new(name: impl Into<String>, kind: ToolKind, arguments: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            arguments,
            command: None,
            paths: Vec::new(),
        }
    }

    /// Set the command line
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the touched paths
    #[must_use]
    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }
}

/// Outcome of a finished tool call
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Output text
    pub output: String,
    /// Whether the tool reported failure
    pub failed: bool,
    /// Exit code, for shell tools
    pub exit_code: Option<i32>,
}

/// Accumulates reply text per logical message id
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    order: Vec<String>,
    texts: HashMap<String, String>,
}

impl MessageAccumulator {
    /// Merge a text update and return the cumulative text.
    ///
    /// An update that already contains the accumulated text replaces it
    /// (cumulative resend); anything else is appended (fragment).
    pub fn merge(&mut self, id: &str, text: &str) -> String {
        let entry = self.entry(id);
        if text.starts_with(entry.as_str()) {
            entry.clear();
            entry.push_str(text);
        } else {
            entry.push_str(text);
        }
        entry.clone()
    }

    /// Append a fragment and return the cumulative text
    pub fn append(&mut self, id: &str, fragment: &str) -> String {
        let entry = self.entry(id);
        entry.push_str(fragment);
        entry.clone()
    }

    /// Replace the text of a message and return it
    pub fn replace(&mut self, id: &str, text: &str) -> String {
        let entry = self.entry(id);
        entry.clear();
        entry.push_str(text);
        entry.clone()
    }

    /// Text of the most recently started message
    pub fn latest(&self) -> Option<&str> {
        self.order
            .last()
            .and_then(|id| self.texts.get(id))
            .map(String::as_str)
    }

    /// All non-empty messages in arrival order, separated by blank lines
    pub fn joined(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .order
            .iter()
            .filter_map(|id| self.texts.get(id))
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    fn entry(&mut self, id: &str) -> &mut String {
        if !self.texts.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.texts.entry(id.to_string()).or_default()
    }
}

/// Bookkeeping common to all vendor parsers
#[derive(Debug, Default)]
pub struct ParserState {
    pub(crate) session_id: Option<String>,
    pub(crate) final_message: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) usage: Option<TokenUsage>,
    pub(crate) messages: MessageAccumulator,
    pending: HashMap<String, PendingTool>,
    started_edits: HashSet<String>,
}

impl ParserState {
    /// Events for a session start; records the session id
    pub fn init(&mut self, session_id: Option<&str>, model: Option<&str>) -> Vec<AgentEvent> {
        if let Some(id) = session_id.filter(|s| !s.is_empty()) {
            self.session_id = Some(id.to_string());
        }
        let mut boot = AgentEvent::new(AgentPhase::Boot, "Session started");
        if let Some(model) = model {
            boot = boot.with_detail(model);
        }
        vec![boot, AgentEvent::new(AgentPhase::Analysis, "Analyzing request")]
    }

    /// A `responding` event carrying the merged cumulative text
    pub fn respond(&mut self, id: &str, text: &str) -> AgentEvent {
        let cumulative = self.messages.merge(id, text);
        self.responding(id, cumulative)
    }

    /// A `responding` event after appending a fragment
    pub fn respond_fragment(&mut self, id: &str, fragment: &str) -> AgentEvent {
        let cumulative = self.messages.append(id, fragment);
        self.responding(id, cumulative)
    }

    fn responding(&self, id: &str, cumulative: String) -> AgentEvent {
        AgentEvent::new(AgentPhase::Responding, "Responding")
            .with_raw(
                EnvelopeKind::Updated,
                ThreadItem::AgentMessage {
                    id: id.to_string(),
                    text: cumulative.clone(),
                },
            )
            .with_delta(cumulative)
    }

    /// An `analysis` event for reasoning text
    pub fn reasoning(&self, id: &str, text: &str) -> AgentEvent {
        AgentEvent::new(AgentPhase::Analysis, "Thinking")
            .with_detail(text)
            .with_raw(
                EnvelopeKind::Completed,
                ThreadItem::Reasoning {
                    id: id.to_string(),
                    text: text.to_string(),
                },
            )
    }

    /// Register a tool call and emit its start event(s)
    pub fn tool_started(&mut self, id: &str, tool: PendingTool) -> Vec<AgentEvent> {
        let events = match tool.kind {
            ToolKind::Shell => vec![command_event(
                id,
                &tool,
                EnvelopeKind::Started,
                &ToolOutcome::default(),
                ItemStatus::InProgress,
            )],
            ToolKind::Edit => {
                self.started_edits.insert(id.to_string());
                vec![edit_event(
                    id,
                    &updates(&tool.paths),
                    EnvelopeKind::Started,
                    ItemStatus::InProgress,
                )]
            }
            ToolKind::Other => vec![tool_event(
                id,
                &tool,
                EnvelopeKind::Started,
                None,
                ItemStatus::InProgress,
            )],
        };
        self.pending.insert(id.to_string(), tool);
        events
    }

    /// Whether a tool call with this id is still running
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Progress on a running shell command
    pub fn tool_progress(&mut self, id: &str, partial_output: &str) -> Vec<AgentEvent> {
        match self.pending.get(id) {
            Some(tool) if tool.kind == ToolKind::Shell => {
                let outcome = ToolOutcome {
                    output: partial_output.to_string(),
                    ..Default::default()
                };
                vec![command_event(
                    id,
                    tool,
                    EnvelopeKind::Updated,
                    &outcome,
                    ItemStatus::InProgress,
                )]
            }
            _ => Vec::new(),
        }
    }

    /// Pair a result with its start by id and emit the completion event(s)
    pub fn tool_finished(&mut self, id: &str, outcome: ToolOutcome) -> Vec<AgentEvent> {
        let Some(tool) = self.pending.remove(id) else {
            debug!(tool_id = %id, "Tool result without a matching start, ignoring");
            return Vec::new();
        };
        let status = if outcome.failed {
            ItemStatus::Failed
        } else {
            ItemStatus::Completed
        };
        match tool.kind {
            ToolKind::Shell => vec![command_event(
                id,
                &tool,
                EnvelopeKind::Completed,
                &outcome,
                status,
            )],
            ToolKind::Edit => {
                self.started_edits.remove(id);
                vec![edit_event(
                    id,
                    &updates(&tool.paths),
                    EnvelopeKind::Completed,
                    status,
                )]
            }
            ToolKind::Other => vec![tool_event(
                id,
                &tool,
                EnvelopeKind::Completed,
                Some(outcome.output),
                status,
            )],
        }
    }

    /// An edit announced before it is applied
    pub fn edit_started(&mut self, id: &str, changes: &[FileChange]) -> Vec<AgentEvent> {
        if !self.started_edits.insert(id.to_string()) {
            return Vec::new();
        }
        vec![edit_event(
            id,
            changes,
            EnvelopeKind::Started,
            ItemStatus::InProgress,
        )]
    }

    /// An edit reported only on completion gets its `preparing` event first
    pub fn edit_completed(
        &mut self,
        id: &str,
        changes: &[FileChange],
        failed: bool,
    ) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        if !self.started_edits.remove(id) {
            events.push(edit_event(
                id,
                changes,
                EnvelopeKind::Started,
                ItemStatus::InProgress,
            ));
        }
        self.pending.remove(id);
        let status = if failed {
            ItemStatus::Failed
        } else {
            ItemStatus::Completed
        };
        events.push(edit_event(id, changes, EnvelopeKind::Completed, status));
        events
    }

    /// Terminal success; an explicit final text overrides the accumulator
    pub fn succeed(&mut self, final_text: Option<&str>) -> AgentEvent {
        if let Some(text) = final_text {
            self.final_message = Some(text.to_string());
        }
        AgentEvent::new(AgentPhase::Completed, "Completed")
    }

    /// Terminal failure; emits at most one error event per invocation
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<AgentEvent> {
        let message = message.into();
        let first = self.last_error.is_none();
        self.last_error = Some(message.clone());
        if !first {
            return Vec::new();
        }
        vec![AgentEvent::new(AgentPhase::Error, "Agent failed")
            .with_detail(message.clone())
            .with_raw(
                EnvelopeKind::Completed,
                ThreadItem::Error {
                    id: "error".to_string(),
                    message,
                },
            )]
    }
}

fn command_event(
    id: &str,
    tool: &PendingTool,
    kind: EnvelopeKind,
    outcome: &ToolOutcome,
    status: ItemStatus,
) -> AgentEvent {
    let command = tool.command.clone().unwrap_or_else(|| tool.name.clone());
    let title = match status {
        ItemStatus::InProgress => "Running command",
        ItemStatus::Completed => "Command finished",
        ItemStatus::Failed => "Command failed",
    };
    AgentEvent::new(AgentPhase::Command, title)
        .with_detail(command.clone())
        .with_raw(
            kind,
            ThreadItem::CommandExecution {
                id: id.to_string(),
                command,
                aggregated_output: outcome.output.clone(),
                exit_code: outcome.exit_code,
                status,
            },
        )
}

fn updates(paths: &[String]) -> Vec<FileChange> {
    paths
        .iter()
        .map(|p| FileChange {
            path: p.clone(),
            kind: ChangeKind::Update,
        })
        .collect()
}

fn edit_event(
    id: &str,
    changes: &[FileChange],
    kind: EnvelopeKind,
    status: ItemStatus,
) -> AgentEvent {
    let title = match (kind, status) {
        (EnvelopeKind::Started, _) => "Preparing edit",
        (_, ItemStatus::Failed) => "Edit failed",
        _ => "Applying edit",
    };
    let mut event = AgentEvent::new(AgentPhase::Editing, title).with_raw(
        kind,
        ThreadItem::FileChange {
            id: id.to_string(),
            changes: changes.to_vec(),
            status,
        },
    );
    if !changes.is_empty() {
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        event = event.with_detail(paths.join(", "));
    }
    event
}

fn tool_event(
    id: &str,
    tool: &PendingTool,
    kind: EnvelopeKind,
    output: Option<String>,
    status: ItemStatus,
) -> AgentEvent {
    let title = match status {
        ItemStatus::InProgress => format!("Calling {}", tool.name),
        ItemStatus::Completed => format!("{} finished", tool.name),
        ItemStatus::Failed => format!("{} failed", tool.name),
    };
    AgentEvent::new(AgentPhase::Tool, title).with_raw(
        kind,
        ThreadItem::ToolCall {
            id: id.to_string(),
            tool: tool.name.clone(),
            arguments: tool.arguments.clone(),
            output,
            status,
        },
    )
}

/// Flatten a vendor tool-result payload (string or list of text blocks)
pub fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => other.get("text").and_then(Value::as_str).map(String::from),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First string found under any of `keys`
pub fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}
