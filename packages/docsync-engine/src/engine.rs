use crate::error::{EngineError, Result};
use crate::store::TaskStore;
use crate::strategy::TaskStrategy;
use crate::task::Task;
use chrono::Duration;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counts grouped by `(task_type, status)`.
pub type TaskStats = HashMap<String, HashMap<String, usize>>;

/// Generic task lifecycle manager.
///
/// Strategies are registered once at startup and resolved by task type;
/// all task state lives in the injected `TaskStore`. One long-lived engine
/// instance is the authority for its task registry -- callers hold it by
/// `Arc`, there are no module-level singletons.
pub struct StateMachineEngine {
    strategies: RwLock<HashMap<String, Arc<dyn TaskStrategy>>>,
    store: Arc<dyn TaskStore>,
}

impl StateMachineEngine {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Register a strategy. Errors on a duplicate `strategy_id` rather than
    /// silently overwriting.
    pub fn register_strategy(&self, strategy: Arc<dyn TaskStrategy>) -> Result<()> {
        let id = strategy.strategy_id().to_string();
        let mut strategies = self.strategies.write();
        if strategies.contains_key(&id) {
            return Err(EngineError::StrategyExists(id));
        }
        info!(strategy_id = %id, "Registered task strategy");
        strategies.insert(id, strategy);
        Ok(())
    }

    fn strategy(&self, task_type: &str) -> Result<Arc<dyn TaskStrategy>> {
        self.strategies
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| EngineError::StrategyNotFound(task_type.to_string()))
    }

    /// Create a task in the strategy's initial status. Errors if no strategy
    /// is registered for `task_type` or the task already exists.
    pub async fn create_task(
        &self,
        task_type: &str,
        task_id: &str,
        context: Option<Value>,
    ) -> Result<Task> {
        let strategy = self.strategy(task_type)?;
        if self.store.get_task(task_type, task_id).await?.is_some() {
            return Err(EngineError::task_exists(task_type, task_id));
        }

        let task = Task::new(task_type, task_id, strategy.initial_status(), context);
        self.store.save_task(&task).await?;
        debug!(task_type, task_id, status = %task.status, "Created task");
        Ok(task)
    }

    /// Idempotent create: repeated calls return the same logical record.
    pub async fn get_or_create_task(
        &self,
        task_type: &str,
        task_id: &str,
        context: Option<Value>,
    ) -> Result<Task> {
        if let Some(existing) = self.store.get_task(task_type, task_id).await? {
            return Ok(existing);
        }
        match self.create_task(task_type, task_id, context).await {
            Ok(task) => Ok(task),
            // Lost a create race; the winner's record is the one we want.
            Err(EngineError::TaskExists { .. }) => self
                .store
                .get_task(task_type, task_id)
                .await?
                .ok_or_else(|| EngineError::task_not_found(task_type, task_id)),
            Err(e) => Err(e),
        }
    }

    pub async fn create_tasks(&self, task_type: &str, task_ids: &[String]) -> Vec<Result<Task>> {
        let mut results = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            results.push(self.create_task(task_type, task_id, None).await);
        }
        results
    }

    pub async fn get_task(&self, task_type: &str, task_id: &str) -> Result<Option<Task>> {
        self.store.get_task(task_type, task_id).await
    }

    /// Apply `event` to a task through its strategy's transition table.
    ///
    /// Returns `false` -- never an error -- for a missing task, a missing
    /// strategy, a transition the table rejects, or a strategy that fails
    /// internally (which is additionally logged). The engine itself does
    /// not treat routine invalid transitions as exceptional.
    pub async fn transition_state(
        &self,
        task_type: &str,
        task_id: &str,
        event: &str,
        context: Option<Value>,
    ) -> bool {
        let strategy = match self.strategy(task_type) {
            Ok(s) => s,
            Err(_) => {
                warn!(task_type, task_id, event, "Transition for unknown task type");
                return false;
            }
        };

        let mut task = match self.store.get_task(task_type, task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task_type, task_id, event, "Transition for missing task");
                return false;
            }
            Err(e) => {
                error!(task_type, task_id, event, error = %e, "Store lookup failed during transition");
                return false;
            }
        };

        match strategy.handle_transition(&mut task, event, context).await {
            Ok(true) => match self.store.update_task(&task).await {
                Ok(()) => {
                    debug!(task_type, task_id, event, status = %task.status, "Transition applied");
                    true
                }
                Err(e) => {
                    error!(task_type, task_id, event, error = %e, "Failed to persist transition");
                    false
                }
            },
            Ok(false) => {
                debug!(task_type, task_id, event, status = %task.status, "Transition rejected");
                false
            }
            Err(e) => {
                error!(task_type, task_id, event, error = %e, "Strategy failed during transition");
                false
            }
        }
    }

    /// Run the strategy's stage logic for the task's current status.
    ///
    /// On failure the strategy's `handle_error` runs first (classifying and
    /// scheduling retries as it sees fit), then the error is re-raised to
    /// the caller.
    pub async fn execute_task(&self, task_type: &str, task_id: &str) -> Result<()> {
        let strategy = self.strategy(task_type)?;
        let mut task = self
            .store
            .get_task(task_type, task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_type, task_id))?;

        if task.started_at.is_none() {
            task.mark_started();
            self.store.update_task(&task).await?;
        }

        match strategy.execute(&task).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(handler_err) = strategy.handle_error(&task, &e).await {
                    error!(
                        task_type, task_id,
                        error = %handler_err,
                        "Strategy error handler itself failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Emit the `cancel` event; strategies whose tables have no cancel
    /// transition from the current status reject it (returns `false`).
    pub async fn cancel_task(&self, task_type: &str, task_id: &str) -> bool {
        self.transition_state(task_type, task_id, "cancel", None)
            .await
    }

    /// Emit the `retry` event and, if the transition succeeds, immediately
    /// re-invoke the task's execution.
    pub async fn retry_task(&self, task_type: &str, task_id: &str) -> Result<bool> {
        if !self
            .transition_state(task_type, task_id, "retry", None)
            .await
        {
            return Ok(false);
        }
        self.execute_task(task_type, task_id).await?;
        Ok(true)
    }

    /// Execute tasks in fixed-size windows of `concurrency`; each window is
    /// fully awaited before the next one starts. This bounds simultaneous
    /// downstream load without a global lock.
    pub async fn execute_tasks(
        &self,
        task_type: &str,
        task_ids: &[String],
        concurrency: usize,
    ) -> Vec<(String, Result<()>)> {
        let window = concurrency.max(1);
        let mut results = Vec::with_capacity(task_ids.len());

        for chunk in task_ids.chunks(window) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|id| self.execute_task(task_type, id))
                .collect();
            let outcomes = futures::future::join_all(futures).await;
            results.extend(chunk.iter().cloned().zip(outcomes));
        }
        results
    }

    /// Remove terminal tasks whose `updated_at` predates `now - older_than`.
    /// A task mid-pipeline is never deleted no matter how old it is.
    pub async fn cleanup_expired_tasks(&self, older_than: Duration) -> Result<u64> {
        let terminal: Vec<String> = {
            let strategies = self.strategies.read();
            strategies
                .values()
                .flat_map(|s| s.terminal_statuses())
                .map(str::to_string)
                .collect()
        };

        let deleted = self.store.cleanup_expired(older_than, &terminal).await?;
        if deleted > 0 {
            info!(deleted, "Cleaned up expired terminal tasks");
        }
        Ok(deleted)
    }

    /// Counts by `(task_type, status)`, built by scanning persisted tasks so
    /// the numbers always match the store.
    pub async fn task_stats(&self) -> Result<TaskStats> {
        let task_types: Vec<String> = {
            let strategies = self.strategies.read();
            strategies.keys().cloned().collect()
        };

        let mut stats = TaskStats::new();
        for task_type in task_types {
            let mut by_status: HashMap<String, usize> = HashMap::new();
            for task in self.store.get_tasks_by_type(&task_type).await? {
                *by_status.entry(task.status).or_insert(0) += 1;
            }
            stats.insert(task_type, by_status);
        }
        Ok(stats)
    }

    pub async fn task_count_by_status(&self, task_type: &str, status: &str) -> Result<usize> {
        Ok(self
            .store
            .get_tasks_by_status(task_type, status)
            .await?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal two-state strategy: pending --finish--> done.
    struct ToggleStrategy {
        executed: AtomicUsize,
        fail_execution: bool,
        errors_handled: AtomicUsize,
    }

    impl ToggleStrategy {
        fn new(fail_execution: bool) -> Self {
            Self {
                executed: AtomicUsize::new(0),
                fail_execution,
                errors_handled: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskStrategy for ToggleStrategy {
        fn strategy_id(&self) -> &str {
            "toggle"
        }

        fn initial_status(&self) -> &str {
            "pending"
        }

        fn terminal_statuses(&self) -> Vec<&'static str> {
            vec!["done"]
        }

        async fn handle_transition(
            &self,
            task: &mut Task,
            event: &str,
            _context: Option<Value>,
        ) -> Result<bool> {
            match (task.status.as_str(), event) {
                ("pending", "finish") => {
                    task.set_status("done");
                    Ok(true)
                }
                ("pending", "explode") => Err(EngineError::ExecutionFailed("bad handler".into())),
                _ => Ok(false),
            }
        }

        async fn execute(&self, _task: &Task) -> Result<()> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.fail_execution {
                return Err(EngineError::ExecutionFailed("stage blew up".into()));
            }
            Ok(())
        }

        async fn handle_error(&self, _task: &Task, _error: &EngineError) -> Result<()> {
            self.errors_handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine_with(strategy: Arc<ToggleStrategy>) -> StateMachineEngine {
        let engine = StateMachineEngine::new(Arc::new(MemoryTaskStore::new()));
        engine.register_strategy(strategy).unwrap();
        engine
    }

    #[tokio::test]
    async fn test_register_duplicate_strategy_fails() {
        let engine = StateMachineEngine::new(Arc::new(MemoryTaskStore::new()));
        engine
            .register_strategy(Arc::new(ToggleStrategy::new(false)))
            .unwrap();

        let err = engine
            .register_strategy(Arc::new(ToggleStrategy::new(false)))
            .unwrap_err();
        assert!(matches!(err, EngineError::StrategyExists(_)));
    }

    #[tokio::test]
    async fn test_create_task_requires_strategy() {
        let engine = StateMachineEngine::new(Arc::new(MemoryTaskStore::new()));
        let err = engine.create_task("unknown", "t-1", None).await.unwrap_err();
        assert!(matches!(err, EngineError::StrategyNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_task_rejects_duplicate() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));
        engine.create_task("toggle", "t-1", None).await.unwrap();

        let err = engine.create_task("toggle", "t-1", None).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskExists { .. }));
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));

        let first = engine
            .get_or_create_task("toggle", "t-1", None)
            .await
            .unwrap();
        let second = engine
            .get_or_create_task("toggle", "t-1", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(
            engine.store().get_tasks_by_type("toggle").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_transition_accept_and_reject() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));
        engine.create_task("toggle", "t-1", None).await.unwrap();

        // Rejected event leaves status untouched.
        assert!(!engine.transition_state("toggle", "t-1", "bogus", None).await);
        let task = engine.get_task("toggle", "t-1").await.unwrap().unwrap();
        assert_eq!(task.status, "pending");

        assert!(engine.transition_state("toggle", "t-1", "finish", None).await);
        let task = engine.get_task("toggle", "t-1").await.unwrap().unwrap();
        assert_eq!(task.status, "done");

        // Terminal: nothing leaves "done".
        assert!(!engine.transition_state("toggle", "t-1", "finish", None).await);
    }

    #[tokio::test]
    async fn test_transition_missing_task_and_type_return_false() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));
        assert!(!engine.transition_state("toggle", "ghost", "finish", None).await);
        assert!(!engine.transition_state("nope", "t-1", "finish", None).await);
    }

    #[tokio::test]
    async fn test_strategy_error_during_transition_surfaces_as_false() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));
        engine.create_task("toggle", "t-1", None).await.unwrap();

        assert!(!engine.transition_state("toggle", "t-1", "explode", None).await);
        let task = engine.get_task("toggle", "t-1").await.unwrap().unwrap();
        assert_eq!(task.status, "pending");
    }

    #[tokio::test]
    async fn test_execute_task_failure_calls_handler_and_reraises() {
        let strategy = Arc::new(ToggleStrategy::new(true));
        let engine = engine_with(strategy.clone());
        engine.create_task("toggle", "t-1", None).await.unwrap();

        let err = engine.execute_task("toggle", "t-1").await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailed(_)));
        assert_eq!(strategy.errors_handled.load(Ordering::SeqCst), 1);

        // started_at stamped on first execution.
        let task = engine.get_task("toggle", "t-1").await.unwrap().unwrap();
        assert!(task.started_at.is_some());
    }

    #[tokio::test]
    async fn test_execute_tasks_runs_every_window() {
        let strategy = Arc::new(ToggleStrategy::new(false));
        let engine = engine_with(strategy.clone());

        let ids: Vec<String> = (0..7).map(|i| format!("t-{i}")).collect();
        for result in engine.create_tasks("toggle", &ids).await {
            result.unwrap();
        }

        let results = engine.execute_tasks("toggle", &ids, 3).await;
        assert_eq!(results.len(), 7);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(strategy.executed.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_task_stats_reflect_store() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));

        engine.create_task("toggle", "t-1", None).await.unwrap();
        engine.create_task("toggle", "t-2", None).await.unwrap();
        engine.transition_state("toggle", "t-2", "finish", None).await;

        let stats = engine.task_stats().await.unwrap();
        assert_eq!(stats["toggle"]["pending"], 1);
        assert_eq!(stats["toggle"]["done"], 1);

        assert_eq!(engine.task_count_by_status("toggle", "done").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_leaves_non_terminal() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));
        let store = engine.store();

        let mut done = Task::new("toggle", "t-done", "done", None);
        done.updated_at = chrono::Utc::now() - Duration::hours(48);
        let mut pending = Task::new("toggle", "t-pending", "pending", None);
        pending.updated_at = chrono::Utc::now() - Duration::hours(48);
        store.save_task(&done).await.unwrap();
        store.save_task(&pending).await.unwrap();

        let deleted = engine.cleanup_expired_tasks(Duration::hours(24)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(engine.get_task("toggle", "t-pending").await.unwrap().is_some());
        assert!(engine.get_task("toggle", "t-done").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_task_rejected_from_non_failed() {
        let engine = engine_with(Arc::new(ToggleStrategy::new(false)));
        engine.create_task("toggle", "t-1", None).await.unwrap();

        // Toggle strategy has no retry transition at all.
        assert!(!engine.retry_task("toggle", "t-1").await.unwrap());
    }
}
