use crate::error::{EngineError, Result};
use crate::store::TaskStore;
use crate::task::Task;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory task store (default, single-process).
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<HashMap<(String, String), Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_task(&self, task_type: &str, task_id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.lock();
        Ok(tasks
            .get(&(task_type.to_string(), task_id.to_string()))
            .cloned())
    }

    async fn get_tasks_by_status(&self, task_type: &str, status: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock();
        Ok(tasks
            .values()
            .filter(|t| t.task_type == task_type && t.status == status)
            .cloned()
            .collect())
    }

    async fn get_tasks_by_type(&self, task_type: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock();
        Ok(tasks
            .values()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock();
        tasks.insert((task.task_type.clone(), task.id.clone()), task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock();
        let key = (task.task_type.clone(), task.id.clone());
        match tasks.get_mut(&key) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(EngineError::task_not_found(&task.task_type, &task.id)),
        }
    }

    async fn delete_task(&self, task_type: &str, task_id: &str) -> Result<bool> {
        let mut tasks = self.tasks.lock();
        Ok(tasks
            .remove(&(task_type.to_string(), task_id.to_string()))
            .is_some())
    }

    async fn cleanup_expired(
        &self,
        older_than: Duration,
        terminal_statuses: &[String],
    ) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(terminal_statuses.iter().any(|s| s == &t.status) && t.updated_at < cutoff)
        });
        Ok((before - tasks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: &str) -> Task {
        Task::new("document_sync", id, status, None)
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = MemoryTaskStore::new();
        store.save_task(&task("doc-1", "new")).await.unwrap();

        let loaded = store.get_task("document_sync", "doc-1").await.unwrap();
        assert_eq!(loaded.unwrap().status, "new");

        let missing = store.get_task("document_sync", "doc-2").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_same_id_under_different_types() {
        let store = MemoryTaskStore::new();
        store.save_task(&task("doc-1", "new")).await.unwrap();
        store
            .save_task(&Task::new("batch_upload", "doc-1", "queued", None))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        let batch = store.get_task("batch_upload", "doc-1").await.unwrap();
        assert_eq!(batch.unwrap().status, "queued");
    }

    #[tokio::test]
    async fn test_update_missing_task_fails() {
        let store = MemoryTaskStore::new();
        let err = store.update_task(&task("doc-1", "new")).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_tasks_by_status() {
        let store = MemoryTaskStore::new();
        store.save_task(&task("doc-1", "new")).await.unwrap();
        store.save_task(&task("doc-2", "failed")).await.unwrap();
        store.save_task(&task("doc-3", "failed")).await.unwrap();

        let failed = store
            .get_tasks_by_status("document_sync", "failed")
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let store = MemoryTaskStore::new();
        store.save_task(&task("doc-1", "new")).await.unwrap();

        assert!(store.delete_task("document_sync", "doc-1").await.unwrap());
        assert!(!store.delete_task("document_sync", "doc-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_terminal_tasks() {
        let store = MemoryTaskStore::new();
        let terminal = vec!["synced".to_string(), "dead".to_string()];

        let mut old_synced = task("doc-1", "synced");
        old_synced.updated_at = Utc::now() - Duration::hours(48);
        let mut old_failed = task("doc-2", "failed");
        old_failed.updated_at = Utc::now() - Duration::hours(48);
        let fresh_synced = task("doc-3", "synced");

        store.save_task(&old_synced).await.unwrap();
        store.save_task(&old_failed).await.unwrap();
        store.save_task(&fresh_synced).await.unwrap();

        let removed = store
            .cleanup_expired(Duration::hours(24), &terminal)
            .await
            .unwrap();

        assert_eq!(removed, 1);
        // Non-terminal stays regardless of age; fresh terminal stays too.
        assert!(store
            .get_task("document_sync", "doc-2")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_task("document_sync", "doc-3")
            .await
            .unwrap()
            .is_some());
    }
}
