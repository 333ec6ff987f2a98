use crate::error::{EngineError, Result};
use crate::store::TaskStore;
use crate::task::Task;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// Durable SQLite-backed task store.
///
/// Stores the serializable task shape verbatim: timestamps as epoch
/// milliseconds, `context` JSON-encoded. Single-row UPSERTs keep writes
/// atomic per `(task_type, id)` key.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (and create if missing) a database at `url`,
    /// e.g. `sqlite:///var/lib/docsync/tasks.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory database, primarily for tests. A single connection keeps
    /// every caller on the same `:memory:` instance.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create the tasks table if it does not exist. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_type       TEXT NOT NULL,
                id              TEXT NOT NULL,
                status          TEXT NOT NULL,
                retries         INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                started_at      INTEGER,
                completed_at    INTEGER,
                last_attempt_at INTEGER,
                error           TEXT,
                progress        INTEGER NOT NULL DEFAULT 0,
                context         TEXT NOT NULL DEFAULT 'null',
                PRIMARY KEY (task_type, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (task_type, status)",
        )
        .execute(&self.pool)
        .await?;

        info!("Task store schema ready");
        Ok(())
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task> {
        let context_raw: String = row.try_get("context")?;
        let context = serde_json::from_str(&context_raw)?;

        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            status: row.try_get("status")?,
            retries: row.try_get::<i64, _>("retries")? as u32,
            created_at: from_millis(row.try_get("created_at")?)?,
            updated_at: from_millis(row.try_get("updated_at")?)?,
            started_at: opt_from_millis(row.try_get("started_at")?)?,
            completed_at: opt_from_millis(row.try_get("completed_at")?)?,
            last_attempt_at: opt_from_millis(row.try_get("last_attempt_at")?)?,
            error: row.try_get("error")?,
            progress: row.try_get::<i64, _>("progress")? as u8,
            context,
        })
    }

    async fn write_task(&self, task: &Task, upsert: bool) -> Result<u64> {
        let context = serde_json::to_string(&task.context)?;
        let sql = if upsert {
            r#"
            INSERT INTO tasks
                (task_type, id, status, retries, created_at, updated_at,
                 started_at, completed_at, last_attempt_at, error, progress, context)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (task_type, id) DO UPDATE SET
                status = excluded.status,
                retries = excluded.retries,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                last_attempt_at = excluded.last_attempt_at,
                error = excluded.error,
                progress = excluded.progress,
                context = excluded.context
            "#
        } else {
            r#"
            UPDATE tasks SET
                status = ?3, retries = ?4, created_at = ?5, updated_at = ?6,
                started_at = ?7, completed_at = ?8, last_attempt_at = ?9,
                error = ?10, progress = ?11, context = ?12
            WHERE task_type = ?1 AND id = ?2
            "#
        };

        let result = sqlx::query(sql)
            .bind(&task.task_type)
            .bind(&task.id)
            .bind(&task.status)
            .bind(task.retries as i64)
            .bind(task.created_at.timestamp_millis())
            .bind(task.updated_at.timestamp_millis())
            .bind(task.started_at.map(|t| t.timestamp_millis()))
            .bind(task.completed_at.map(|t| t.timestamp_millis()))
            .bind(task.last_attempt_at.map(|t| t.timestamp_millis()))
            .bind(&task.error)
            .bind(task.progress as i64)
            .bind(context)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| EngineError::Storage(format!("invalid epoch-millis timestamp: {ms}")))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get_task(&self, task_type: &str, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_type = ? AND id = ?")
            .bind(task_type)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn get_tasks_by_status(&self, task_type: &str, status: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE task_type = ? AND status = ?")
            .bind(task_type)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_tasks_by_type(&self, task_type: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE task_type = ?")
            .bind(task_type)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.write_task(task, true).await?;
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let affected = self.write_task(task, false).await?;
        if affected == 0 {
            return Err(EngineError::task_not_found(&task.task_type, &task.id));
        }
        Ok(())
    }

    async fn delete_task(&self, task_type: &str, task_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE task_type = ? AND id = ?")
            .bind(task_type)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_expired(
        &self,
        older_than: Duration,
        terminal_statuses: &[String],
    ) -> Result<u64> {
        let cutoff = (Utc::now() - older_than).timestamp_millis();
        let mut deleted = 0u64;
        for status in terminal_statuses {
            let result = sqlx::query("DELETE FROM tasks WHERE status = ? AND updated_at < ?")
                .bind(status)
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }
}
