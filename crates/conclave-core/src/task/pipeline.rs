//! Verification and context for tasks

use super::store::TaskStore;
use super::{Task, TaskSpec};
use crate::directives::DelegationDirective;
use crate::error::Result;
use conclave_tools::{format_report, VerificationResult, Verifier};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Context key holding the last verification report of a task
pub const VERIFICATION_REPORT_KEY: &str = "verification_report";

/// Promotes delegations and verifies finished work
pub struct TaskPipeline {
    store: Arc<dyn TaskStore>,
    verifier: Arc<Verifier>,
}

impl TaskPipeline {
    /// Pipeline over `store` and `verifier`
    pub fn new(store: Arc<dyn TaskStore>, verifier: Arc<Verifier>) -> Self {
        Self { store, verifier }
    }

    /// Turn a delegation into a spec
    pub fn promote(&self, directive: &DelegationDirective) -> TaskSpec {
        TaskSpec::promote(directive)
    }

    /// Run the task's verification commands and store the report.
    ///
    /// Tasks without commands yield no results and leave the context untouched.
    pub async fn verify(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Vec<VerificationResult>> {
        let commands = match &task.spec {
            Some(spec) if !spec.verification.is_empty() => &spec.verification,
            _ => return Ok(Vec::new()),
        };

        let results = self.verifier.run(commands, cancel).await?;
        let report = format_report(&results);
        self.store
            .save_context(task.context_key(), VERIFICATION_REPORT_KEY, &report)
            .await?;
        info!(
            task_id = %task.id,
            passed = results.iter().filter(|r| r.ok).count(),
            skipped = results.iter().filter(|r| r.skipped).count(),
            total = results.len(),
            "Task verified"
        );
        Ok(results)
    }

    /// Last stored verification report for the task's logical id
    pub async fn previous_report(&self, task: &Task) -> Result<Option<String>> {
        self.store
            .get_context(task.context_key(), VERIFICATION_REPORT_KEY)
            .await
    }

    /// The task prompt, followed by the previous verification report when one exists
    pub async fn prompt_for(&self, task: &Task, prompt: &str) -> Result<String> {
        Ok(match self.previous_report(task).await? {
            Some(report) => format!(
                "{}\n\nThe previous attempt was verified with this result:\n{}",
                prompt, report
            ),
            None => prompt.to_string(),
        })
    }
}
