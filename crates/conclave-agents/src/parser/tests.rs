use super::*;
use crate::events::{AgentPhase, EnvelopeKind, ItemStatus, ThreadItem};
use serde_json::json;

fn feed(parser: &mut dyn StreamParser, lines: &[Value]) -> Vec<AgentEvent> {
    lines.iter().flat_map(|l| parser.parse_line(l)).collect()
}

fn phases(events: &[AgentEvent]) -> Vec<AgentPhase> {
    events.iter().map(|e| e.phase).collect()
}

// ============================================================================
// Claude
// ============================================================================

#[test]
fn test_claude_init_emits_boot_and_analysis() {
    let mut parser = ClaudeStreamParser::new();
    let events = parser.parse_line(&json!({
        "type": "system",
        "subtype": "init",
        "session_id": "sess-1",
        "model": "claude-sonnet"
    }));

    assert_eq!(phases(&events), vec![AgentPhase::Boot, AgentPhase::Analysis]);
    assert_eq!(events[0].detail.as_deref(), Some("claude-sonnet"));
    assert_eq!(parser.session_id(), Some("sess-1"));
}

#[test]
fn test_claude_text_delta_is_cumulative() {
    let mut parser = ClaudeStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "assistant", "message": {"id": "m1", "content": [{"type": "text", "text": "Hel"}]}}),
            json!({"type": "assistant", "message": {"id": "m1", "content": [{"type": "text", "text": "Hello"}]}}),
            json!({"type": "assistant", "message": {"id": "m2", "content": [{"type": "text", "text": "A"}]}}),
            json!({"type": "assistant", "message": {"id": "m2", "content": [{"type": "text", "text": "B"}]}}),
        ],
    );

    let deltas: Vec<&str> = events.iter().filter_map(|e| e.delta.as_deref()).collect();
    assert_eq!(deltas, vec!["Hel", "Hello", "A", "AB"]);
    assert!(events.iter().all(|e| e.phase == AgentPhase::Responding));
}

#[test]
fn test_claude_partial_stream_events_accumulate() {
    let mut parser = ClaudeStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "stream_event", "event": {"type": "message_start", "message": {"id": "m1"}}}),
            json!({"type": "stream_event", "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hi "}}}),
            json!({"type": "stream_event", "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "there"}}}),
            json!({"type": "assistant", "message": {"id": "m1", "content": [{"type": "text", "text": "Hi there"}]}}),
        ],
    );

    let deltas: Vec<&str> = events.iter().filter_map(|e| e.delta.as_deref()).collect();
    assert_eq!(deltas, vec!["Hi ", "Hi there", "Hi there"]);
}

#[test]
fn test_claude_shell_tool_pairs_by_id() {
    let mut parser = ClaudeStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "assistant", "message": {"id": "m1", "content": [
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}},
                {"type": "tool_use", "id": "t2", "name": "Bash", "input": {"command": "pwd"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t2", "content": "/work"}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "a.txt"}]}
            ]}}),
        ],
    );

    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.phase == AgentPhase::Command));
    assert_eq!(events[0].raw.as_ref().unwrap().kind, EnvelopeKind::Started);

    match &events[2].raw.as_ref().unwrap().item {
        ThreadItem::CommandExecution {
            id,
            command,
            aggregated_output,
            status,
            ..
        } => {
            assert_eq!(id, "t2");
            assert_eq!(command, "pwd");
            assert_eq!(aggregated_output, "/work");
            assert_eq!(*status, ItemStatus::Completed);
        }
        other => panic!("unexpected item: {:?}", other),
    }
    match &events[3].raw.as_ref().unwrap().item {
        ThreadItem::CommandExecution {
            command,
            aggregated_output,
            ..
        } => {
            assert_eq!(command, "ls");
            assert_eq!(aggregated_output, "a.txt");
        }
        other => panic!("unexpected item: {:?}", other),
    }
}

#[test]
fn test_claude_edit_tool_emits_preparing_then_applying() {
    let mut parser = ClaudeStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "assistant", "message": {"id": "m1", "content": [
                {"type": "tool_use", "id": "e1", "name": "Edit", "input": {"file_path": "src/lib.rs"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "e1", "content": "ok"}
            ]}}),
        ],
    );

    assert_eq!(phases(&events), vec![AgentPhase::Editing, AgentPhase::Editing]);
    assert_eq!(events[0].title, "Preparing edit");
    assert_eq!(events[1].title, "Applying edit");
    assert_eq!(events[1].detail.as_deref(), Some("src/lib.rs"));
}

#[test]
fn test_claude_other_tool_uses_tool_phase() {
    let mut parser = ClaudeStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "assistant", "message": {"id": "m1", "content": [
                {"type": "tool_use", "id": "g1", "name": "Grep", "input": {"pattern": "fn"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "g1", "content": "boom", "is_error": true}
            ]}}),
        ],
    );

    assert_eq!(phases(&events), vec![AgentPhase::Tool, AgentPhase::Tool]);
    assert_eq!(events[1].title, "Grep failed");
}

#[test]
fn test_claude_result_overrides_streamed_text() {
    let mut parser = ClaudeStreamParser::new();
    feed(
        &mut parser,
        &[
            json!({"type": "assistant", "message": {"id": "m1", "content": [{"type": "text", "text": "streamed"}]}}),
            json!({"type": "result", "subtype": "success", "is_error": false, "result": "summary",
                   "usage": {"input_tokens": 12, "output_tokens": 3, "cache_read_input_tokens": 4}}),
        ],
    );

    assert_eq!(parser.final_message().as_deref(), Some("summary"));
    assert!(parser.last_error().is_none());
    let usage = parser.usage().unwrap();
    assert_eq!(usage.input_tokens, 12);
    assert_eq!(usage.cached_input_tokens, 4);
}

#[test]
fn test_claude_error_result_sets_last_error() {
    let mut parser = ClaudeStreamParser::new();
    let events = parser.parse_line(&json!({
        "type": "result",
        "subtype": "error_during_execution",
        "is_error": true
    }));

    assert_eq!(phases(&events), vec![AgentPhase::Error]);
    assert_eq!(
        parser.last_error(),
        Some("claude reported error_during_execution")
    );
}

#[test]
fn test_unknown_and_invalid_lines_are_ignored() {
    let mut parser = ClaudeStreamParser::new();
    assert!(parser.parse_line(&json!({"type": "brand_new_event"})).is_empty());
    assert!(parser.parse_line(&json!(["not", "an", "object"])).is_empty());
    assert!(parser.parse_raw("not json at all").is_empty());
    assert!(parser.parse_raw("   ").is_empty());
    assert!(parser.final_message().is_none());
}

// ============================================================================
// Codex
// ============================================================================

#[test]
fn test_codex_full_turn() {
    let mut parser = CodexStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "thread.started", "thread_id": "th-9"}),
            json!({"type": "turn.started"}),
            json!({"type": "item.started", "item": {"id": "c1", "type": "command_execution",
                   "command": "cargo fmt", "aggregated_output": "", "exit_code": null, "status": "in_progress"}}),
            json!({"type": "item.completed", "item": {"id": "c1", "type": "command_execution",
                   "command": "cargo fmt", "aggregated_output": "oops", "exit_code": 1, "status": "failed"}}),
            json!({"type": "item.completed", "item": {"id": "a1", "type": "agent_message", "text": "first"}}),
            json!({"type": "item.completed", "item": {"id": "a2", "type": "agent_message", "text": "done"}}),
            json!({"type": "turn.completed", "usage": {"input_tokens": 100, "cached_input_tokens": 40, "output_tokens": 7}}),
        ],
    );

    assert_eq!(
        phases(&events),
        vec![
            AgentPhase::Boot,
            AgentPhase::Analysis,
            AgentPhase::Command,
            AgentPhase::Command,
            AgentPhase::Responding,
            AgentPhase::Responding,
            AgentPhase::Completed,
        ]
    );
    assert_eq!(events[3].title, "Command failed");
    match &events[3].raw.as_ref().unwrap().item {
        ThreadItem::CommandExecution { exit_code, .. } => assert_eq!(*exit_code, Some(1)),
        other => panic!("unexpected item: {:?}", other),
    }
    assert_eq!(parser.session_id(), Some("th-9"));
    assert_eq!(parser.final_message().as_deref(), Some("done"));
    assert_eq!(parser.usage().unwrap().total(), 107);
}

#[test]
fn test_codex_file_change_without_start_emits_pair() {
    let mut parser = CodexStreamParser::new();
    let events = parser.parse_line(&json!({
        "type": "item.completed",
        "item": {"id": "f1", "type": "file_change", "status": "completed",
                 "changes": [{"path": "README.md", "kind": "add"}]}
    }));

    assert_eq!(phases(&events), vec![AgentPhase::Editing, AgentPhase::Editing]);
    assert_eq!(events[0].raw.as_ref().unwrap().kind, EnvelopeKind::Started);
    assert_eq!(events[1].raw.as_ref().unwrap().kind, EnvelopeKind::Completed);
}

#[test]
fn test_codex_failure_emits_single_error() {
    let mut parser = CodexStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "error", "message": "stream disconnected"}),
            json!({"type": "turn.failed", "error": {"message": "stream disconnected"}}),
        ],
    );

    assert_eq!(phases(&events), vec![AgentPhase::Error]);
    assert_eq!(parser.last_error(), Some("stream disconnected"));
}

// ============================================================================
// Gemini
// ============================================================================

#[test]
fn test_gemini_turn_with_tool() {
    let mut parser = GeminiStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "init", "session_id": "g-1", "model": "gemini-pro"}),
            json!({"type": "message", "role": "user", "content": "list files"}),
            json!({"type": "message", "role": "assistant", "content": "Let me ", "delta": true}),
            json!({"type": "message", "role": "assistant", "content": "look.", "delta": true}),
            json!({"type": "tool_use", "tool_name": "run_shell_command", "tool_id": "s1",
                   "parameters": {"command": "ls"}}),
            json!({"type": "tool_result", "tool_id": "s1", "status": "success", "output": "a.txt"}),
            json!({"type": "message", "role": "assistant", "content": "Found a.txt", "delta": true}),
            json!({"type": "result", "status": "success", "stats": {"input_tokens": 5, "output_tokens": 2}}),
        ],
    );

    assert_eq!(
        phases(&events),
        vec![
            AgentPhase::Boot,
            AgentPhase::Analysis,
            AgentPhase::Responding,
            AgentPhase::Responding,
            AgentPhase::Command,
            AgentPhase::Command,
            AgentPhase::Responding,
            AgentPhase::Completed,
        ]
    );
    assert_eq!(events[3].delta.as_deref(), Some("Let me look."));
    assert_eq!(events[6].delta.as_deref(), Some("Found a.txt"));
    assert_eq!(
        parser.final_message().as_deref(),
        Some("Let me look.\n\nFound a.txt")
    );
    assert_eq!(parser.session_id(), Some("g-1"));
}

#[test]
fn test_gemini_error_result() {
    let mut parser = GeminiStreamParser::new();
    let events = feed(
        &mut parser,
        &[
            json!({"type": "error", "severity": "warning", "message": "slow"}),
            json!({"type": "result", "status": "error", "error": {"type": "quota", "message": "quota exceeded"}}),
        ],
    );

    assert_eq!(phases(&events), vec![AgentPhase::Analysis, AgentPhase::Error]);
    assert_eq!(parser.last_error(), Some("quota exceeded"));
}

#[test]
fn test_vendor_parsing() {
    assert_eq!("Claude".parse::<Vendor>().unwrap(), Vendor::Claude);
    assert_eq!(" codex ".parse::<Vendor>().unwrap(), Vendor::Codex);
    assert!("copilot".parse::<Vendor>().is_err());
    assert_eq!(Vendor::Gemini.parser().vendor(), Vendor::Gemini);
    assert!(Vendor::Claude.default_args().contains(&"{prompt}".to_string()));
}
