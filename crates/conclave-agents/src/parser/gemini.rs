//! Gemini CLI `stream-json` parser

use super::state::{flatten_text, str_field, ParserState, PendingTool, ToolKind, ToolOutcome};
use super::{StreamParser, Vendor};
use crate::events::{AgentEvent, AgentPhase, TokenUsage};
use serde_json::Value;

const SHELL_TOOLS: &[&str] = &["run_shell_command"];
const EDIT_TOOLS: &[&str] = &["replace", "write_file"];

/// Parser for `gemini --output-format stream-json`.
///
/// Gemini messages carry no id; a message runs until the next tool call, so
/// text after a tool result starts a new message.
#[derive(Debug, Default)]
pub struct GeminiStreamParser {
    state: ParserState,
    message_index: usize,
    message_open: bool,
}

impl GeminiStreamParser {
    /// Create a parser for one invocation
    pub fn new() -> Self {
        Self::default()
    }

    fn current_message(&mut self) -> String {
        if !self.message_open {
            self.message_index += 1;
            self.message_open = true;
        }
        format!("message-{}", self.message_index)
    }

    fn message(&mut self, line: &Value) -> Vec<AgentEvent> {
        if line.get("role").and_then(Value::as_str) != Some("assistant") {
            return Vec::new();
        }
        let Some(content) = line.get("content").and_then(Value::as_str) else {
            return Vec::new();
        };
        let id = self.current_message();
        let is_delta = line.get("delta").and_then(Value::as_bool).unwrap_or(false);
        if is_delta {
            vec![self.state.respond_fragment(&id, content)]
        } else {
            vec![self.state.respond(&id, content)]
        }
    }

    fn tool_use(&mut self, line: &Value) -> Vec<AgentEvent> {
        let Some(tool_id) = line.get("tool_id").and_then(Value::as_str) else {
            return Vec::new();
        };
        self.message_open = false;
        let name = line.get("tool_name").and_then(Value::as_str).unwrap_or("tool");
        let params = line.get("parameters").cloned().unwrap_or(Value::Null);
        let tool = if SHELL_TOOLS.contains(&name) {
            let command = str_field(&params, &["command"]).unwrap_or(name).to_string();
            PendingTool::new(name, ToolKind::Shell, params).with_command(command)
        } else if EDIT_TOOLS.contains(&name) {
            let paths = str_field(&params, &["file_path", "absolute_path", "path"])
                .map(|p| vec![p.to_string()])
                .unwrap_or_default();
            PendingTool::new(name, ToolKind::Edit, params).with_paths(paths)
        } else {
            PendingTool::new(name, ToolKind::Other, params)
        };
        self.state.tool_started(tool_id, tool)
    }

    fn tool_result(&mut self, line: &Value) -> Vec<AgentEvent> {
        let Some(tool_id) = line.get("tool_id").and_then(Value::as_str) else {
            return Vec::new();
        };
        let failed = line.get("status").and_then(Value::as_str) == Some("error");
        let output = if failed {
            line.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| flatten_text(line.get("output").unwrap_or(&Value::Null)))
        } else {
            flatten_text(line.get("output").unwrap_or(&Value::Null))
        };
        self.state.tool_finished(
            tool_id,
            ToolOutcome {
                output,
                failed,
                exit_code: None,
            },
        )
    }

    fn result(&mut self, line: &Value) -> Vec<AgentEvent> {
        if let Some(stats) = line.get("stats") {
            let field = |k: &str| stats.get(k).and_then(Value::as_u64).unwrap_or(0);
            self.state.usage = Some(TokenUsage {
                input_tokens: field("input_tokens"),
                output_tokens: field("output_tokens"),
                cached_input_tokens: field("cached"),
            });
        }
        if line.get("status").and_then(Value::as_str) == Some("error") {
            let message = line
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("gemini reported an error");
            return self.state.fail(message);
        }
        vec![self.state.succeed(None)]
    }
}

impl StreamParser for GeminiStreamParser {
    fn vendor(&self) -> Vendor {
        Vendor::Gemini
    }

    fn parse_line(&mut self, line: &Value) -> Vec<AgentEvent> {
        match line.get("type").and_then(Value::as_str) {
            Some("init") => {
                let session = line.get("session_id").and_then(Value::as_str);
                let model = line.get("model").and_then(Value::as_str);
                self.state.init(session, model)
            }
            Some("message") => self.message(line),
            Some("tool_use") => self.tool_use(line),
            Some("tool_result") => self.tool_result(line),
            Some("error") => {
                let message = line.get("message").and_then(Value::as_str).unwrap_or("");
                if line.get("severity").and_then(Value::as_str) == Some("warning") {
                    vec![AgentEvent::new(AgentPhase::Analysis, "Warning").with_detail(message)]
                } else {
                    self.state.fail(message)
                }
            }
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
