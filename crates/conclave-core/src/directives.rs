//! Directive protocol
//!
//! Agents request work by embedding blocks in their replies:
//!
//! ```text
//! <<<agent.reviewer
//! Review the diff in src/lib.rs
//! >>>
//! ```
//!
//! `<<<tool.<name>` blocks have the same shape. Ids are case-insensitive and
//! normalized to lower case; the closing `>>>` must sit on its own line.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static AGENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)<<<agent\.([a-z0-9_\-]+)[ \t]*\r?\n(.*?)^[ \t]*>>>[ \t]*\r?$")
        .expect("agent directive pattern is a compile-time constant")
});

static TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)<<<tool\.([a-z0-9_.\-]+)[ \t]*\r?\n(.*?)^[ \t]*>>>[ \t]*\r?$")
        .expect("tool directive pattern is a compile-time constant")
});

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n(?:[ \t]*\r?\n){2,}").expect("blank-line pattern is a compile-time constant")
});

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n(.*?)\r?\n[ \t]*```")
        .expect("fence pattern is a compile-time constant")
});

/// A request to hand a prompt to another agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationDirective {
    /// Matched block, verbatim
    pub raw: String,
    /// Target agent, lower-cased
    pub agent_id: String,
    /// Trimmed prompt
    pub prompt: String,
}

/// A request to run a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirective {
    /// Matched block, verbatim
    pub raw: String,
    /// Tool name, lower-cased
    pub name: String,
    /// Trimmed body
    pub body: String,
}

/// Delegation blocks in order of appearance; blocks with an empty prompt are ignored
pub fn extract_delegation_directives(text: &str) -> Vec<DelegationDirective> {
    AGENT_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let prompt = caps.get(2).map_or("", |m| m.as_str()).trim();
            if prompt.is_empty() {
                return None;
            }
            Some(DelegationDirective {
                raw: caps[0].to_string(),
                agent_id: caps[1].to_lowercase(),
                prompt: prompt.to_string(),
            })
        })
        .collect()
}

/// Tool blocks in order of appearance
pub fn extract_tool_directives(text: &str) -> Vec<ToolDirective> {
    TOOL_BLOCK
        .captures_iter(text)
        .map(|caps| ToolDirective {
            raw: caps[0].to_string(),
            name: caps[1].to_lowercase(),
            body: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        })
        .collect()
}

/// Remove delegation blocks and tidy the remaining text
pub fn strip_delegation_blocks(text: &str) -> String {
    collapse_blank_lines(&AGENT_BLOCK.replace_all(text, ""))
}

/// Remove tool blocks and tidy the remaining text
pub fn strip_tool_blocks(text: &str) -> String {
    collapse_blank_lines(&TOOL_BLOCK.replace_all(text, ""))
}

/// Squash runs of blank lines into one and trim the ends
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n\n").trim().to_string()
}

/// Per-task decision in a supervisor verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskVerdict {
    /// Task the verdict is about
    #[serde(alias = "taskId", alias = "id")]
    pub task_id: String,
    /// Whether the result is accepted
    pub accept: bool,
    /// Reviewer remark
    #[serde(default)]
    pub note: Option<String>,
}

/// Supervisor review payload: `{"verdicts": [{"taskId", "accept", "note"}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorVerdict {
    /// One entry per reviewed task
    pub verdicts: Vec<TaskVerdict>,
}

/// JSON payload embedded in `text`: a fenced block, else the first `{` to the last `}`
pub fn extract_json_payload(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Some(body) = caps.get(1) {
            return Some(body.as_str().trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Decode a supervisor verdict embedded anywhere in `text`
pub fn parse_supervisor_verdict(text: &str) -> Option<SupervisorVerdict> {
    let payload = extract_json_payload(text)?;
    serde_json::from_str(payload).ok()
}

/// Whether the whole reply is a verdict payload and nothing else
pub fn looks_like_supervisor_verdict(text: &str) -> bool {
    let trimmed = text.trim();
    let whole_fence = trimmed.starts_with("```") && trimmed.ends_with("```");
    let whole_object = trimmed.starts_with('{') && trimmed.ends_with('}');
    if !whole_fence && !whole_object {
        return false;
    }
    parse_supervisor_verdict(trimmed).is_some()
}
