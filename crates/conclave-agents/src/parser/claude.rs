//! Claude Code `stream-json` parser

use super::state::{flatten_text, str_field, ParserState, PendingTool, ToolKind, ToolOutcome};
use super::{StreamParser, Vendor};
use crate::events::{AgentEvent, TokenUsage};
use serde_json::Value;

const SHELL_TOOLS: &[&str] = &["Bash"];
const EDIT_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// Parser for `claude --output-format stream-json`
#[derive(Debug, Default)]
pub struct ClaudeStreamParser {
    state: ParserState,
    streaming_message: Option<String>,
    anonymous_messages: usize,
}

impl ClaudeStreamParser {
    /// Create a parser for one invocation
    pub fn new() -> Self {
        Self::default()
    }

    fn message_id(&mut self, message: &Value) -> String {
        match message.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                self.anonymous_messages += 1;
                format!("message-{}", self.anonymous_messages)
            }
        }
    }

    fn assistant(&mut self, line: &Value) -> Vec<AgentEvent> {
        let Some(message) = line.get("message") else {
            return Vec::new();
        };
        let id = self.message_id(message);
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        events.push(self.state.respond(&id, text));
                    }
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                        events.push(self.state.reasoning(&id, text));
                    }
                }
                Some("tool_use") => {
                    let Some(tool_id) = block.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    events.extend(self.state.tool_started(tool_id, classify(name, input)));
                }
                _ => {}
            }
        }
        events
    }

    fn user(&mut self, line: &Value) -> Vec<AgentEvent> {
        let Some(blocks) = line
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let Some(tool_id) = block.get("tool_use_id").and_then(Value::as_str) else {
                continue;
            };
            let failed = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let outcome = ToolOutcome {
                output: flatten_text(block.get("content").unwrap_or(&Value::Null)),
                failed,
                exit_code: None,
            };
            events.extend(self.state.tool_finished(tool_id, outcome));
        }
        events
    }

    fn stream_event(&mut self, line: &Value) -> Vec<AgentEvent> {
        let Some(event) = line.get("event") else {
            return Vec::new();
        };
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                self.streaming_message = event
                    .get("message")
                    .and_then(|m| m.get("id"))
                    .and_then(Value::as_str)
                    .map(String::from);
                Vec::new()
            }
            Some("content_block_delta") => {
                let delta = event.get("delta");
                let is_text =
                    delta.and_then(|d| d.get("type")).and_then(Value::as_str) == Some("text_delta");
                match (is_text, delta.and_then(|d| d.get("text")).and_then(Value::as_str)) {
                    (true, Some(text)) => {
                        let id = self
                            .streaming_message
                            .clone()
                            .unwrap_or_else(|| "stream".to_string());
                        vec![self.state.respond_fragment(&id, text)]
                    }
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn result(&mut self, line: &Value) -> Vec<AgentEvent> {
        if let Some(usage) = line.get("usage") {
            self.state.usage = Some(TokenUsage {
                input_tokens: usage
                    .get("input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                output_tokens: usage
                    .get("output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                cached_input_tokens: usage
                    .get("cache_read_input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            });
        }
        if let Some(id) = line.get("session_id").and_then(Value::as_str) {
            self.state.session_id = Some(id.to_string());
        }

        let subtype = line.get("subtype").and_then(Value::as_str).unwrap_or("");
        let is_error = line.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        if is_error || subtype.starts_with("error") {
            let message = line
                .get("result")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("claude reported {}", subtype));
            return self.state.fail(message);
        }

        let final_text = line.get("result").and_then(Value::as_str);
        vec![self.state.succeed(final_text)]
    }
}

fn classify(name: &str, input: Value) -> PendingTool {
    if SHELL_TOOLS.contains(&name) {
        let command = str_field(&input, &["command"]).unwrap_or(name).to_string();
        PendingTool::new(name, ToolKind::Shell, input).with_command(command)
    } else if EDIT_TOOLS.contains(&name) {
        let paths = str_field(&input, &["file_path", "notebook_path", "path"])
            .map(|p| vec![p.to_string()])
            .unwrap_or_default();
        PendingTool::new(name, ToolKind::Edit, input).with_paths(paths)
    } else {
        PendingTool::new(name, ToolKind::Other, input)
    }
}

impl StreamParser for ClaudeStreamParser {
    fn vendor(&self) -> Vendor {
        Vendor::Claude
    }

    fn parse_line(&mut self, line: &Value) -> Vec<AgentEvent> {
        match line.get("type").and_then(Value::as_str) {
            Some("system") if line.get("subtype").and_then(Value::as_str) == Some("init") => {
                let session = line.get("session_id").and_then(Value::as_str);
                let model = line.get("model").and_then(Value::as_str);
                self.state.init(session, model)
            }
            Some("assistant") => self.assistant(line),
            Some("user") => self.user(line),
            Some("stream_event") => self.stream_event(line),
            Some("result") => self.result(line),
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
            .or_else(|| self.state.messages.joined())
    }

    fn last_error(&self) -> Option<&str> {
        self.state.last_error.as_deref()
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.state.usage
    }
}
