//! Codex `exec --json` parser

use super::state::{flatten_text, str_field, ParserState, PendingTool, ToolKind, ToolOutcome};
use super::{StreamParser, Vendor};
use crate::events::{AgentEvent, AgentPhase, ChangeKind, FileChange, TokenUsage};
use serde_json::Value;

/// Parser for `codex exec --json`
#[derive(Debug, Default)]
pub struct CodexStreamParser {
    state: ParserState,
    last_agent_message: Option<String>,
}

impl CodexStreamParser {
    /// Create a parser for one invocation
    pub fn new() -> Self {
        Self::default()
    }

    fn item(&mut self, stage: &str, item: &Value) -> Vec<AgentEvent> {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            return Vec::new();
        };
        let completed = stage == "item.completed";
        match item.get("type").and_then(Value::as_str) {
            Some("agent_message") => {
                let text = item.get("text").and_then(Value::as_str).unwrap_or("");
                let event = self.state.respond(id, text);
                if completed {
                    self.last_agent_message = event.delta.clone();
                }
                vec![event]
            }
            Some("reasoning") if completed => {
                let text = str_field(item, &["text", "summary"]).unwrap_or("");
                vec![self.state.reasoning(id, text)]
            }
            Some("command_execution") => {
                let output = item
                    .get("aggregated_output")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                match stage {
                    "item.started" => {
                        let command = item.get("command").and_then(Value::as_str).unwrap_or("");
                        self.state.tool_started(
                            id,
                            PendingTool::new("shell", ToolKind::Shell, item.clone())
                                .with_command(command),
                        )
                    }
                    "item.updated" => self.state.tool_progress(id, output),
                    _ => {
                        let command = item.get("command").and_then(Value::as_str).unwrap_or("");
                        let exit_code = item
                            .get("exit_code")
                            .and_then(Value::as_i64)
                            .map(|c| c as i32);
                        let failed = item.get("status").and_then(Value::as_str) == Some("failed")
                            || exit_code.is_some_and(|c| c != 0);
                        let mut events = Vec::new();
                        if !self.is_pending(id) {
                            events.extend(self.state.tool_started(
                                id,
                                PendingTool::new("shell", ToolKind::Shell, item.clone())
                                    .with_command(command),
                            ));
                        }
                        events.extend(self.state.tool_finished(
                            id,
                            ToolOutcome {
                                output: output.to_string(),
                                failed,
                                exit_code,
                            },
                        ));
                        events
                    }
                }
            }
            Some("file_change") => {
                let changes = file_changes(item);
                if completed {
                    let failed = item.get("status").and_then(Value::as_str) == Some("failed");
                    self.state.edit_completed(id, &changes, failed)
                } else {
                    self.state.edit_started(id, &changes)
                }
            }
            Some("mcp_tool_call") | Some("web_search") => {
                let name = match item.get("type").and_then(Value::as_str) {
                    Some("web_search") => "web_search".to_string(),
                    _ => {
                        let server = item.get("server").and_then(Value::as_str).unwrap_or("mcp");
                        let tool = item.get("tool").and_then(Value::as_str).unwrap_or("tool");
                        format!("{}.{}", server, tool)
                    }
                };
                let mut events = Vec::new();
                if !self.is_pending(id) {
                    let arguments = item
                        .get("arguments")
                        .or_else(|| item.get("query"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    events.extend(self.state.tool_started(
                        id,
                        PendingTool::new(name, ToolKind::Other, arguments),
                    ));
                }
                if completed {
                    let error = item.get("error").filter(|e| !e.is_null()).map(|e| {
                        str_field(e, &["message"])
                            .map(String::from)
                            .unwrap_or_else(|| e.to_string())
                    });
                    let failed = error.is_some()
                        || item.get("status").and_then(Value::as_str) == Some("failed");
                    let output = error.unwrap_or_else(|| {
                        item.get("result")
                            .map(|r| flatten_text(r.get("content").unwrap_or(r)))
                            .unwrap_or_default()
                    });
                    events.extend(self.state.tool_finished(
                        id,
                        ToolOutcome {
                            output,
                            failed,
                            exit_code: None,
                        },
                    ));
                }
                events
            }
            Some("error") => {
                let message = item.get("message").and_then(Value::as_str).unwrap_or("");
                vec![AgentEvent::new(AgentPhase::Analysis, "Warning").with_detail(message)]
            }
            _ => Vec::new(),
        }
    }

    fn is_pending(&self, id: &str) -> bool {
        self.state.is_pending(id)
    }
}

fn file_changes(item: &Value) -> Vec<FileChange> {
    item.get("changes")
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter_map(|c| {
                    let path = c.get("path").and_then(Value::as_str)?;
                    let kind = match c.get("kind").and_then(Value::as_str) {
                        Some("add") => ChangeKind::Add,
                        Some("delete") => ChangeKind::Delete,
                        _ => ChangeKind::Update,
                    };
                    Some(FileChange {
                        path: path.to_string(),
                        kind,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl StreamParser for CodexStreamParser {
    fn vendor(&self) -> Vendor {
        Vendor::Codex
    }

    fn parse_line(&mut self, line: &Value) -> Vec<AgentEvent> {
        match line.get("type").and_then(Value::as_str) {
            Some("thread.started") => {
                let thread = line.get("thread_id").and_then(Value::as_str);
                self.state.init(thread, None)
            }
            Some(stage @ ("item.started" | "item.updated" | "item.completed")) => {
                match line.get("item") {
                    Some(item) => self.item(stage, item),
                    None => Vec::new(),
                }
            }
            Some("turn.completed") => {
                if let Some(usage) = line.get("usage") {
                    let field = |k: &str| usage.get(k).and_then(Value::as_u64).unwrap_or(0);
                    self.state.usage = Some(TokenUsage {
                        input_tokens: field("input_tokens"),
                        output_tokens: field("output_tokens"),
                        cached_input_tokens: field("cached_input_tokens"),
                    });
                }
                let last = self.last_agent_message.clone();
                vec![self.state.succeed(last.as_deref())]
            }
            Some("turn.failed") => {
                let message = line
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("codex turn failed");
                self.state.fail(message)
            }
            Some("error") => {
                let message = line
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("codex reported an error");
                self.state.fail(message)
            }
            _ => Vec::new(),
        }
    }

    fn session_id(&self) -> Option<&str> {
        self.state.session_id.as_deref()
    }

    fn final_message(&self) -> Option<String> {
        self.state
            .final_message
            .clone()
            .or_else(|| self.last_agent_message.clone())
            .or_else(|| self.state.messages.latest().map(String::from))
    }

    fn last_error(&self) -> Option<&str> {
        self.state.last_error.as_deref()
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.state.usage
    }
}
