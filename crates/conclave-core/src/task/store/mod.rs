//! Task persistence
//!
//! The queue only talks to [`TaskStore`]. `mark_prompt_injected` is the
//! exactly-once guard: it succeeds for the first caller only.

mod sqlite;


pub use sqlite::SqliteTaskStore;

use super::{Task, TaskFilter};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Task persistence contract
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task; ids are unique
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// Fetch by id
    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Tasks matching `filter`, oldest first
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Persist status, timestamps and results; never touches `prompt_injected_at`
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Set `prompt_injected_at` if unset; `true` only for the call that set it
    async fn mark_prompt_injected(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Store a context value for a task
    async fn save_context(&self, task_id: &str, key: &str, value: &str) -> Result<()>;

    /// Fetch a context value
    async fn get_context(&self, task_id: &str, key: &str) -> Result<Option<String>>;
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
    context: HashMap<(String, String), String>,
}

/// In-process store
#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(Error::InvalidTask(format!("task '{}' already exists", task.id)));
        }
        state.order.push(task.id.clone());
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock().tasks.get(id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let state = self.lock();
        let tasks = state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| filter.matches(t))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut state = self.lock();
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| Error::Store(format!("task '{}' not found", task.id)))?;
        let injected = stored.prompt_injected_at;
        *stored = task.clone();
        stored.prompt_injected_at = injected;
        Ok(())
    }

    async fn mark_prompt_injected(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::Store(format!("task '{}' not found", id)))?;
        if task.prompt_injected_at.is_some() {
            return Ok(false);
        }
        task.prompt_injected_at = Some(now);
        Ok(true)
    }

    async fn save_context(&self, task_id: &str, key: &str, value: &str) -> Result<()> {
        self.lock()
            .context
            .insert((task_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn get_context(&self, task_id: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .context
            .get(&(task_id.to_string(), key.to_string()))
            .cloned())
    }
}
