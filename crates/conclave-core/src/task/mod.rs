//! Task pipeline and queue
//!
//! Delegations promoted to [`TaskSpec`]s are stored as [`Task`]s and run one
//! at a time by the [`TaskQueue`] and [`TaskWorker`].

mod pipeline;
mod queue;
mod spec;
mod store;
mod worker;

pub use pipeline::{TaskPipeline, VERIFICATION_REPORT_KEY};
pub use queue::{PromptInjection, PromptInjector, TaskListener, TaskOutcome, TaskQueue};
pub use spec::{TaskResult, TaskResultStatus, TaskSpec};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use worker::{TaskExecutor, TaskWorker};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to start
    Pending,
    /// The single active task
    Running,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Stopped before finishing
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Queue id
    pub id: String,
    /// Short title
    pub title: String,
    /// Prompt delivered when the task starts
    pub prompt: String,
    /// Lifecycle state
    pub status: TaskStatus,
    /// When the prompt was delivered; set once, at start
    pub prompt_injected_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time
    pub finished_at: Option<DateTime<Utc>>,
    /// Final output
    pub result: Option<String>,
    /// Failure reason
    pub error: Option<String>,
    /// Structured spec, when promoted from one
    pub spec: Option<TaskSpec>,
}

impl Task {
    /// Pending task with a fresh id
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            prompt_injected_at: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            spec: None,
        }
    }

    /// Pending task rendering `spec`
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            spec: Some(spec.clone()),
            ..Self::new(spec.title(), spec.to_prompt())
        }
    }

    /// Key under which this task's context is stored: the `TaskSpec` task id when present
    pub fn context_key(&self) -> &str {
        self.spec.as_ref().map_or(&self.id, |s| &s.task_id)
    }
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only these statuses; empty means all
    pub statuses: Vec<TaskStatus>,
    /// Maximum number of tasks
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Tasks in `status`
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            statuses: vec![status],
            limit: None,
        }
    }

    /// Whether `task` passes the status filter
    pub fn matches(&self, task: &Task) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&task.status)
    }
}
