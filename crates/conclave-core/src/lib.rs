//! Conclave Core - Orchestration Engine
//!
//! This crate provides the coordination logic between agents, including:
//! - Directives: the `<<<agent.<id>` / `<<<tool.<name>` protocol and verdict detection
//! - Delegation: the bounded, deduplicating delegation queue
//! - Turn: the collaborative turn engine driving the main agent
//! - Task: task specs, verification, persistence and the single-worker queue

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod delegation;
pub mod directives;
pub mod error;
pub mod limits;
pub mod task;
pub mod turn;

#[cfg(test)]
mod testing;

pub use delegation::{
    delegate_results_prompt, DelegationOutcome, DelegationQueue, DelegationStatus,
    DelegationSummary,
};
pub use directives::{
    collapse_blank_lines, extract_delegation_directives, extract_json_payload,
    extract_tool_directives, looks_like_supervisor_verdict, parse_supervisor_verdict,
    strip_delegation_blocks, strip_tool_blocks, DelegationDirective, SupervisorVerdict,
    TaskVerdict, ToolDirective,
};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError, WARNING_MARKER};
pub use limits::{RoundLimit, TurnLimits};
pub use task::{
    MemoryTaskStore, PromptInjection, PromptInjector, SqliteTaskStore, Task, TaskExecutor,
    TaskFilter, TaskListener, TaskOutcome, TaskPipeline, TaskQueue, TaskResult,
    TaskResultStatus, TaskSpec, TaskStatus, TaskStore, TaskWorker, VERIFICATION_REPORT_KEY,
};
pub use turn::{tool_results_prompt, ToolInvoker, TurnEngine, TurnResult};
