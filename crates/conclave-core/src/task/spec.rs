//! Structured task specifications
//!
//! A delegation becomes a [`TaskSpec`] either by decoding a JSON payload the
//! agent embedded in its prompt or by wrapping the prompt verbatim.

use crate::directives::{extract_json_payload, DelegationDirective};
use crate::error::{Error, Result};
use conclave_tools::VerificationCommand;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// A verifiable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Logical task id, stable across revisions
    pub task_id: String,
    /// Revision, starting at 1
    pub revision: u32,
    /// Agent expected to do the work
    #[serde(default)]
    pub agent_id: Option<String>,
    /// What must be achieved
    pub goal: String,
    /// Rules the work must respect
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Expected artifacts
    #[serde(default)]
    pub deliverables: Vec<String>,
    /// Conditions for acceptance
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Commands that check the work
    #[serde(default)]
    pub verification: Vec<VerificationCommand>,
}

/// Alias-tolerant wire shape
#[derive(Debug, Deserialize)]
struct RawTaskSpec {
    #[serde(default, alias = "taskId", alias = "id")]
    task_id: Option<String>,
    #[serde(default)]
    revision: Option<u32>,
    #[serde(default, alias = "agentId", alias = "agent")]
    agent_id: Option<String>,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    deliverables: Vec<String>,
    #[serde(default, alias = "acceptanceCriteria", alias = "acceptance")]
    acceptance_criteria: Vec<String>,
    #[serde(default, alias = "verify", alias = "commands")]
    verification: Vec<VerificationCommand>,
}

fn generate_task_id() -> String {
    format!("task-{}", Uuid::new_v4().simple())
}

impl TaskSpec {
    /// Spec with a fresh id and no extras
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            task_id: generate_task_id(),
            revision: 1,
            agent_id: None,
            goal: goal.into(),
            constraints: Vec::new(),
            deliverables: Vec::new(),
            acceptance_criteria: Vec::new(),
            verification: Vec::new(),
        }
    }

    /// Decode an embedded JSON payload; `None` on any decode or validation failure
    pub fn from_json_payload(text: &str) -> Option<Self> {
        let payload = extract_json_payload(text)?;
        let raw: RawTaskSpec = match serde_json::from_str(payload) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "Payload is not a task spec");
                return None;
            }
        };

        let spec = Self {
            task_id: raw
                .task_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(generate_task_id),
            revision: raw.revision.unwrap_or(1),
            agent_id: raw.agent_id.map(|a| a.trim().to_lowercase()),
            goal: raw.goal.or(raw.prompt).unwrap_or_default(),
            constraints: raw.constraints,
            deliverables: raw.deliverables,
            acceptance_criteria: raw.acceptance_criteria,
            verification: raw.verification,
        };
        match spec.validate() {
            Ok(()) => Some(spec),
            Err(e) => {
                debug!(error = %e, "Rejected task payload");
                None
            }
        }
    }

    /// Wrap a plain delegation verbatim
    pub fn from_directive(directive: &DelegationDirective) -> Self {
        Self {
            agent_id: Some(directive.agent_id.clone()),
            ..Self::new(directive.prompt.clone())
        }
    }

    /// Structured spec if the prompt carries one, else the verbatim wrapper
    pub fn promote(directive: &DelegationDirective) -> Self {
        match Self::from_json_payload(&directive.prompt) {
            Some(mut spec) => {
                spec.agent_id.get_or_insert_with(|| directive.agent_id.clone());
                spec
            }
            None => Self::from_directive(directive),
        }
    }

    /// Check the schema rules
    pub fn validate(&self) -> Result<()> {
        if self.task_id.trim().is_empty() {
            return Err(Error::InvalidTask("taskId must not be empty".to_string()));
        }
        if self.revision < 1 {
            return Err(Error::InvalidTask(format!(
                "revision must be at least 1, got {}",
                self.revision
            )));
        }
        if self.goal.trim().is_empty() {
            return Err(Error::InvalidTask("goal must not be empty".to_string()));
        }
        if let Some(command) = self.verification.iter().find(|c| c.cmd.trim().is_empty()) {
            return Err(Error::InvalidTask(format!(
                "verification command with empty cmd ({:?})",
                command.args
            )));
        }
        Ok(())
    }

    /// Short title: the goal's first line, clipped
    pub fn title(&self) -> String {
        let first = self.goal.lines().next().unwrap_or_default().trim();
        if first.chars().count() > 80 {
            let clipped: String = first.chars().take(77).collect();
            format!("{}...", clipped)
        } else {
            first.to_string()
        }
    }

    /// Prompt handed to the executing agent
    pub fn to_prompt(&self) -> String {
        let mut out = format!(
            "Task {} (revision {})\n\nGoal:\n{}\n",
            self.task_id, self.revision, self.goal
        );
        for (heading, items) in [
            ("Constraints", &self.constraints),
            ("Deliverables", &self.deliverables),
            ("Acceptance criteria", &self.acceptance_criteria),
        ] {
            if !items.is_empty() {
                out.push_str(&format!("\n{}:\n", heading));
                for item in items {
                    out.push_str(&format!("- {}\n", item));
                }
            }
        }
        if !self.verification.is_empty() {
            out.push_str("\nThese commands will be run to verify the work:\n");
            for command in &self.verification {
                out.push_str(&format!("- `{}`\n", command.display()));
            }
        }
        out.push_str(&format!(
            "\nWhen finished, end your reply with a JSON block: \
             {{\"taskId\": \"{}\", \"revision\": {}, \"status\": \"completed|failed|blocked\", \
             \"summary\": \"...\", \"changedFiles\": []}}",
            self.task_id, self.revision
        ));
        out
    }
}

/// Status an agent reports for its work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    /// Work done
    Completed,
    /// Work attempted and failed
    Failed,
    /// Cannot proceed without help
    Blocked,
}

/// Result payload an agent reports for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task the result is about
    #[serde(alias = "taskId", alias = "id")]
    pub task_id: String,
    /// Revision worked on
    #[serde(default = "default_revision")]
    pub revision: u32,
    /// Reported status
    pub status: TaskResultStatus,
    /// What was done
    #[serde(default)]
    pub summary: String,
    /// Files touched
    #[serde(default, alias = "changedFiles", alias = "changed")]
    pub changed_files: Vec<String>,
}

fn default_revision() -> u32 {
    1
}

impl TaskResult {
    /// Decode a result embedded in a reply; `None` when absent or malformed
    pub fn from_reply(text: &str) -> Option<Self> {
        let payload = extract_json_payload(text)?;
        let result: Self = serde_json::from_str(payload).ok()?;
        (!result.task_id.trim().is_empty() && result.revision >= 1).then_some(result)
    }
}
