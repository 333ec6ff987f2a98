//! Task persistence ports and adapters.
//!
//! The engine consumes only the `TaskStore` trait and treats every call as
//! potentially blocking I/O. Two interchangeable adapters:
//!
//! - `MemoryTaskStore`: process-local map, the single-process default
//! - `SqliteTaskStore`: durable table for restart-survivable task state

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use crate::error::Result;
use crate::task::Task;
use async_trait::async_trait;
use chrono::Duration;

/// Storage port for task records.
///
/// Writes must be atomic per `(task_type, id)` key; last-writer-wins is
/// acceptable and no cross-task transactions are required.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, task_type: &str, task_id: &str) -> Result<Option<Task>>;

    async fn get_tasks_by_status(&self, task_type: &str, status: &str) -> Result<Vec<Task>>;

    async fn get_tasks_by_type(&self, task_type: &str) -> Result<Vec<Task>>;

    /// Insert or replace the record for `(task.task_type, task.id)`.
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Replace an existing record; errors if the task does not exist.
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete_task(&self, task_type: &str, task_id: &str) -> Result<bool>;

    /// Remove tasks whose status is in `terminal_statuses` and whose
    /// `updated_at` predates `now - older_than`. Non-terminal tasks are
    /// never removed regardless of age. Returns the number deleted.
    async fn cleanup_expired(
        &self,
        older_than: Duration,
        terminal_statuses: &[String],
    ) -> Result<u64>;
}
