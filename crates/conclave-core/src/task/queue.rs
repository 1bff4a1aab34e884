//! Single-active-task queue
//!
//! `pending → running → {completed, failed, cancelled}`. At most one task runs
//! at a time, and nothing starts until [`TaskQueue::start_next`] is called,
//! normally by a worker woken through [`TaskQueue::notify`] or
//! [`TaskQueue::resume`]. Adding a task never starts it.
//!
//! Each started task owns a cancellation token; cancelling the running task
//! fires it so the work in flight stops.

use super::store::TaskStore;
use super::{Task, TaskFilter, TaskSpec, TaskStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Finished with this output
    Completed(String),
    /// Failed for this reason
    Failed(String),
    /// Stopped before finishing
    Cancelled,
}

/// Hooks fired on task transitions, in registration order
#[async_trait]
pub trait TaskListener: Send + Sync {
    /// The task just moved to `running`
    async fn on_task_started(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    /// The task just reached a terminal state
    async fn on_task_completed(&self, _task: &Task) {}
}

struct RunningTask {
    id: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    running: Option<RunningTask>,
    paused: bool,
}

/// Single-worker task queue over a [`TaskStore`]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    state: Mutex<QueueState>,
    listeners: RwLock<Vec<Arc<dyn TaskListener>>>,
    notify: Notify,
}

impl TaskQueue {
    /// Queue over `store`
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState::default()),
            listeners: RwLock::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Backing store
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Register a transition listener
    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn TaskListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Enqueue a pending task; does not start it
    pub async fn add(&self, title: impl Into<String>, prompt: impl Into<String>) -> Result<Task> {
        let task = Task::new(title, prompt);
        self.store.create_task(&task).await?;
        debug!(task_id = %task.id, "Task queued");
        Ok(task)
    }

    /// Enqueue a validated spec
    pub async fn add_spec(&self, spec: TaskSpec) -> Result<Task> {
        spec.validate()?;
        let task = Task::from_spec(spec);
        self.store.create_task(&task).await?;
        debug!(task_id = %task.id, "Task queued from spec");
        Ok(task)
    }

    /// Wake the worker
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Wait for a wake-up; a notify sent while nobody waited is not lost
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Stop starting new tasks; the running one is unaffected
    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
        info!("Task queue paused");
    }

    /// Allow starting again and wake the worker
    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
        info!("Task queue resumed");
        self.notify();
    }

    /// Whether the queue is paused
    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    /// Id of the running task
    pub async fn running(&self) -> Option<String> {
        self.state.lock().await.running.as_ref().map(|r| r.id.clone())
    }

    /// Cancellation token of the running task `id`
    pub async fn cancellation(&self, id: &str) -> Option<CancellationToken> {
        self.state
            .lock()
            .await
            .running
            .as_ref()
            .filter(|r| r.id == id)
            .map(|r| r.cancel.clone())
    }

    /// Start the oldest pending task, unless paused or one is already running
    pub async fn start_next(&self) -> Result<Option<Task>> {
        self.start_next_with(CancellationToken::new()).await
    }

    /// [`start_next`](Self::start_next), handing the task `cancel`; the queue
    /// fires it when the task is cancelled or finished
    pub async fn start_next_with(&self, cancel: CancellationToken) -> Result<Option<Task>> {
        let mut state = self.state.lock().await;
        if state.paused {
            debug!("Queue paused, not starting");
            return Ok(None);
        }
        if let Some(running) = &state.running {
            debug!(task_id = %running.id, "A task is already running");
            return Ok(None);
        }

        let mut next = self
            .store
            .list_tasks(&TaskFilter {
                statuses: vec![TaskStatus::Pending],
                limit: Some(1),
            })
            .await?;
        let Some(mut task) = next.pop() else {
            return Ok(None);
        };

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.store.update_task(&task).await?;
        state.running = Some(RunningTask {
            id: task.id.clone(),
            cancel,
        });
        drop(state);

        info!(task_id = %task.id, title = %task.title, "Task started");
        for listener in self.listeners() {
            if let Err(e) = listener.on_task_started(&task).await {
                warn!(task_id = %task.id, error = %e, "Start listener failed");
            }
        }

        // listeners may have marked the prompt as injected
        Ok(Some(self.store.get_task(&task.id).await?.unwrap_or(task)))
    }

    /// Finish the running task; never starts the next one.
    ///
    /// Only a running task can complete or fail. Pending tasks may only be
    /// cancelled.
    pub async fn complete(&self, id: &str, outcome: TaskOutcome) -> Result<Task> {
        let mut state = self.state.lock().await;
        let mut task = self
            .store
            .get_task(id)
            .await?
            .ok_or_else(|| Error::Store(format!("task '{}' not found", id)))?;
        if task.status.is_terminal() {
            return Err(Error::InvalidTask(format!(
                "task '{}' already {}",
                id, task.status
            )));
        }
        if task.status != TaskStatus::Running && outcome != TaskOutcome::Cancelled {
            return Err(Error::InvalidTask(format!(
                "task '{}' is {}, not running",
                id, task.status
            )));
        }

        match outcome {
            TaskOutcome::Completed(output) => {
                task.status = TaskStatus::Completed;
                task.result = Some(output);
            }
            TaskOutcome::Failed(reason) => {
                task.status = TaskStatus::Failed;
                task.error = Some(reason);
            }
            TaskOutcome::Cancelled => task.status = TaskStatus::Cancelled,
        }
        task.finished_at = Some(Utc::now());
        self.store.update_task(&task).await?;

        if state.running.as_ref().is_some_and(|r| r.id == id) {
            if let Some(running) = state.running.take() {
                running.cancel.cancel();
            }
        }
        drop(state);

        info!(task_id = %task.id, status = %task.status, "Task finished");
        for listener in self.listeners() {
            listener.on_task_completed(&task).await;
        }
        Ok(task)
    }

    /// Cancel a pending or running task; a running task's token is fired
    pub async fn cancel(&self, id: &str) -> Result<Task> {
        self.complete(id, TaskOutcome::Cancelled).await
    }

    /// All tasks, oldest first
    pub async fn list(&self) -> Result<Vec<Task>> {
        self.store.list_tasks(&TaskFilter::default()).await
    }
}

/// A prompt delivered for a started task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInjection {
    /// Task id
    pub task_id: String,
    /// Prompt text
    pub prompt: String,
}

type Deliver = Box<dyn Fn(PromptInjection) + Send + Sync>;

/// Start listener delivering each task's prompt exactly once
///
/// Blank prompts are never delivered. Delivery happens only if this call
/// won the store's `mark_prompt_injected` guard.
pub struct PromptInjector {
    store: Arc<dyn TaskStore>,
    deliver: Deliver,
}

impl PromptInjector {
    /// Injector calling `deliver` for each injected prompt
    pub fn new<F>(store: Arc<dyn TaskStore>, deliver: F) -> Self
    where
        F: Fn(PromptInjection) + Send + Sync + 'static,
    {
        Self {
            store,
            deliver: Box::new(deliver),
        }
    }
}

#[async_trait]
impl TaskListener for PromptInjector {
    async fn on_task_started(&self, task: &Task) -> Result<()> {
        if task.prompt.trim().is_empty() {
            debug!(task_id = %task.id, "Blank prompt, nothing to inject");
            return Ok(());
        }
        if !self.store.mark_prompt_injected(&task.id, Utc::now()).await? {
            warn!(task_id = %task.id, "Prompt already injected, skipping");
            return Ok(());
        }
        (self.deliver)(PromptInjection {
            task_id: task.id.clone(),
            prompt: task.prompt.clone(),
        });
        Ok(())
    }
}
