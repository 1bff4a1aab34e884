//! SQLite-backed task store

use super::TaskStore;
use crate::error::{Error, Result};
use crate::task::{Task, TaskFilter, TaskSpec, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Task store persisted in SQLite
pub struct SqliteTaskStore {
    pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: String,
    title: String,
    prompt: String,
    status: String,
    prompt_injected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    result: Option<String>,
    error: Option<String>,
    spec_json: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = TaskStatus::from_str(&row.status).map_err(Error::Store)?;
        let spec = row
            .spec_json
            .as_deref()
            .map(serde_json::from_str::<TaskSpec>)
            .transpose()?;
        Ok(Task {
            id: row.id,
            title: row.title,
            prompt: row.prompt,
            status,
            prompt_injected_at: row.prompt_injected_at,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            result: row.result,
            error: row.error,
            spec,
        })
    }
}

impl SqliteTaskStore {
    /// Open (creating if needed) the database at `path`
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Store(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %path.display(), "Task store opened");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL,
                prompt_injected_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                started_at TIMESTAMP,
                finished_at TIMESTAMP,
                result TEXT,
                error TEXT,
                spec_json TEXT
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_context (
                task_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                PRIMARY KEY (task_id, key)
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let spec_json = task.spec.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, prompt, status, prompt_injected_at, created_at,
                started_at, finished_at, result, error, spec_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.prompt)
        .bind(task.status.as_str())
        .bind(task.prompt_injected_at)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.result)
        .bind(&task.error)
        .bind(spec_json)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::InvalidTask(format!("task '{}' already exists", task.id))
            }
            other => Error::from(other),
        })?;

        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks");
        if !filter.statuses.is_empty() {
            query.push(" WHERE status IN (");
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY created_at ASC, rowid ASC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows: Vec<TaskRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let spec_json = task.spec.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                title = ?, prompt = ?, status = ?, started_at = ?,
                finished_at = ?, result = ?, error = ?, spec_json = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.title)
        .bind(&task.prompt)
        .bind(task.status.as_str())
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.result)
        .bind(&task.error)
        .bind(spec_json)
        .bind(&task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Store(format!("task '{}' not found", task.id)));
        }
        Ok(())
    }

    async fn mark_prompt_injected(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET prompt_injected_at = ? WHERE id = ? AND prompt_injected_at IS NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_context(&self, task_id: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_context (task_id, key, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(task_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(task_id)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_context(&self, task_id: &str, key: &str) -> Result<Option<String>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM task_context WHERE task_id = ? AND key = ?")
                .bind(task_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|(v,)| v))
    }
}
