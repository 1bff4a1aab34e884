//! Background task worker
//!
//! Waits for the queue's wake-up, starts one task, executes its injected
//! prompt, verifies the work and completes the task. It handles at most one
//! task per wake-up and never advances on its own.

use super::pipeline::TaskPipeline;
use super::queue::{PromptInjection, PromptInjector, TaskOutcome, TaskQueue};
use super::spec::{TaskResult, TaskResultStatus};
use super::Task;
use crate::error::{Error, Result};
use crate::turn::TurnEngine;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Executes a task prompt and returns the agent's reply
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `prompt` for `task`
    async fn execute(&self, task: &Task, prompt: &str, cancel: &CancellationToken)
        -> Result<String>;
}

#[async_trait]
impl TaskExecutor for TurnEngine {
    async fn execute(
        &self,
        _task: &Task,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.run(prompt, cancel).await?.response)
    }
}

/// Single background loop over a [`TaskQueue`]
pub struct TaskWorker {
    queue: Arc<TaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    pipeline: Arc<TaskPipeline>,
    injections: Mutex<mpsc::UnboundedReceiver<PromptInjection>>,
}

impl TaskWorker {
    /// Create a worker and attach its prompt injector to `queue`
    pub fn new(
        queue: Arc<TaskQueue>,
        executor: Arc<dyn TaskExecutor>,
        pipeline: Arc<TaskPipeline>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        queue.add_listener(Arc::new(PromptInjector::new(
            queue.store().clone(),
            move |injection| {
                if tx.send(injection).is_err() {
                    warn!("Task worker is gone, dropping injected prompt");
                }
            },
        )));
        Self {
            queue,
            executor,
            pipeline,
            injections: Mutex::new(rx),
        }
    }

    fn take_injection(&self, task_id: &str) -> Option<String> {
        let mut rx = self.injections.lock().unwrap_or_else(|e| e.into_inner());
        let mut found = None;
        while let Ok(injection) = rx.try_recv() {
            if injection.task_id == task_id {
                found = Some(injection.prompt);
            } else {
                warn!(task_id = %injection.task_id, "Discarding injection for another task");
            }
        }
        found
    }

    /// Wait for wake-ups and run one task per wake-up until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Task worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => {}
            }
            match self.step(&cancel).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => error!(error = %e, "Task worker step failed"),
            }
        }
        info!("Task worker stopped");
        Ok(())
    }

    /// Start and finish at most one task.
    ///
    /// The task runs under its own token, derived from `cancel`. When the
    /// queue cancels it mid-run the task is already finished in the store and
    /// is returned as stored; when `cancel` fires the task is cancelled and
    /// the error is returned.
    pub async fn step(&self, cancel: &CancellationToken) -> Result<Option<Task>> {
        let task_cancel = cancel.child_token();
        let Some(task) = self.queue.start_next_with(task_cancel.clone()).await? else {
            return Ok(None);
        };
        let started = Instant::now();

        let outcome = match self.take_injection(&task.id) {
            Some(prompt) => self.execute(&task, &prompt, &task_cancel).await,
            None if task.prompt.trim().is_empty() => {
                Ok(TaskOutcome::Completed("empty prompt, nothing to do".to_string()))
            }
            None => Ok(TaskOutcome::Failed(
                "prompt was already delivered earlier".to_string(),
            )),
        };

        if task_cancel.is_cancelled() && !cancel.is_cancelled() {
            info!(task_id = %task.id, "Task cancelled while running");
            return self.stored(task).await.map(Some);
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                if let Err(e) = self.queue.complete(&task.id, TaskOutcome::Cancelled).await {
                    debug!(task_id = %task.id, error = %e, "Task was already finished");
                }
                return Err(Error::Cancelled);
            }
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };

        let finished = match self.queue.complete(&task.id, outcome).await {
            Ok(finished) => finished,
            // cancelled between the check above and completion
            Err(Error::InvalidTask(_)) if task_cancel.is_cancelled() => self.stored(task).await?,
            Err(e) => return Err(e),
        };
        info!(
            task_id = %finished.id,
            status = %finished.status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Task handled"
        );
        Ok(Some(finished))
    }

    async fn stored(&self, task: Task) -> Result<Task> {
        Ok(self.queue.store().get_task(&task.id).await?.unwrap_or(task))
    }

    async fn execute(
        &self,
        task: &Task,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let prompt = self.pipeline.prompt_for(task, prompt).await?;
        let reply = self.executor.execute(task, &prompt, cancel).await?;

        if let Some(result) = TaskResult::from_reply(&reply) {
            if result.status != TaskResultStatus::Completed {
                let reason = if result.summary.is_empty() {
                    format!("agent reported {:?}", result.status).to_lowercase()
                } else {
                    result.summary
                };
                return Ok(TaskOutcome::Failed(reason));
            }
        }

        let results = self.pipeline.verify(task, cancel).await?;
        let ran = results.iter().filter(|r| !r.skipped).count();
        let failed = results.iter().filter(|r| r.is_failure()).count();
        if ran < results.len() {
            debug!(task_id = %task.id, skipped = results.len() - ran, "Verification skipped");
        }
        if failed > 0 {
            return Ok(TaskOutcome::Failed(format!(
                "{} of {} verification commands failed",
                failed, ran
            )));
        }
        Ok(TaskOutcome::Completed(reply))
    }
}

#[cfg(test)]
mod tests;
