//! Object-facing surface of the sync pipeline.
//!
//! `SyncService` wires the engine, scheduler and the document-sync
//! strategy together and exposes the operations HTTP routes and
//! schedulers consume: trigger a sync, inspect job state, cancel pending
//! retries, run cleanup sweeps.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use docsync_engine::{
    RetryScheduler, RetryStats, StateMachineEngine, Task, TaskStore,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::ErrorCategory;
use crate::error::{Result, SyncError};
use crate::ports::{EmbeddingProvider, MetadataRepo, Splitter, VectorRepo};
use crate::strategy::{SyncStatus, TASK_TYPE};
use crate::sync::{DocumentSyncStrategy, SyncConfig};

pub struct SyncService {
    engine: Arc<StateMachineEngine>,
    scheduler: Arc<RetryScheduler>,
    store: Arc<dyn TaskStore>,
    // Per-document in-flight guard: a second trigger_sync for a doc whose
    // pipeline run is still executing returns the current record instead
    // of racing it.
    in_flight: Arc<DashMap<String, ()>>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        splitter: Arc<dyn Splitter>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorRepo>,
        metadata: Arc<dyn MetadataRepo>,
        config: SyncConfig,
    ) -> Result<Self> {
        let scheduler = Arc::new(RetryScheduler::new());
        let engine = Arc::new(StateMachineEngine::new(Arc::clone(&store)));
        let strategy = DocumentSyncStrategy::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            splitter,
            embedder,
            vectors,
            metadata,
            config.clone(),
        );
        engine.register_strategy(Arc::new(strategy))?;

        Ok(Self {
            engine,
            scheduler,
            store,
            in_flight: Arc::new(DashMap::new()),
            config,
        })
    }

    pub fn engine(&self) -> Arc<StateMachineEngine> {
        Arc::clone(&self.engine)
    }

    pub fn scheduler(&self) -> Arc<RetryScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Start (or resume) a sync for `doc_id`. Pipeline failures never
    /// surface as errors here; callers observe them through the returned
    /// task's status and `get_sync_job_status`.
    pub async fn trigger_sync(&self, doc_id: &str) -> Result<Task> {
        if self.in_flight.insert(doc_id.to_string(), ()).is_some() {
            debug!(doc_id, "Sync already in flight, returning current state");
            return self.require_task(doc_id).await;
        }

        let result = self.run_once(doc_id).await;
        self.in_flight.remove(doc_id);
        result
    }

    async fn run_once(&self, doc_id: &str) -> Result<Task> {
        let task = self
            .engine
            .get_or_create_task(TASK_TYPE, doc_id, Some(json!({ "doc_id": doc_id })))
            .await?;

        let status = SyncStatus::from_str(&task.status);
        if status.map(|s| s.is_terminal()).unwrap_or(false) {
            info!(doc_id, status = %task.status, "Sync job already terminal");
            return Ok(task);
        }

        // A manual trigger on a failed job is itself a retry attempt and
        // must go through the retry transition.
        let outcome = if status == Some(SyncStatus::Failed) {
            self.engine.retry_task(TASK_TYPE, doc_id).await.map(|_| ())
        } else {
            self.engine.execute_task(TASK_TYPE, doc_id).await
        };
        if let Err(e) = outcome {
            // The strategy's error handler already classified the failure
            // and transitioned to failed/retrying/dead.
            warn!(doc_id, error = %e, "Sync run failed");
        }
        self.require_task(doc_id).await
    }

    async fn require_task(&self, doc_id: &str) -> Result<Task> {
        self.engine
            .get_task(TASK_TYPE, doc_id)
            .await?
            .ok_or_else(|| SyncError::DocumentNotFound(doc_id.to_string()))
    }

    pub async fn get_sync_job_status(&self, doc_id: &str) -> Result<Option<Task>> {
        Ok(self.engine.get_task(TASK_TYPE, doc_id).await?)
    }

    pub async fn get_all_sync_jobs(&self) -> Result<Vec<Task>> {
        Ok(self.store.get_tasks_by_type(TASK_TYPE).await?)
    }

    pub async fn get_sync_job_count_by_status(&self, status: SyncStatus) -> Result<usize> {
        Ok(self
            .engine
            .task_count_by_status(TASK_TYPE, status.as_str())
            .await?)
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.scheduler.stats()
    }

    /// Cancel every pending retry timer for a document (used when the
    /// document is deleted while retries are outstanding).
    pub fn cancel_all_retries_for_doc(&self, doc_id: &str) -> usize {
        self.scheduler.cancel_all_for_task(doc_id)
    }

    /// Whether another retry is still permitted for a failed/retrying job.
    pub async fn can_retry(&self, doc_id: &str) -> Result<bool> {
        let Some(task) = self.engine.get_task(TASK_TYPE, doc_id).await? else {
            return Ok(false);
        };
        match SyncStatus::from_str(&task.status) {
            Some(SyncStatus::Failed) | Some(SyncStatus::Retrying) => {}
            _ => return Ok(false),
        }

        let category = task
            .context
            .get("error_category")
            .and_then(|v| v.as_str())
            .and_then(ErrorCategory::from_str)
            .unwrap_or(ErrorCategory::Unknown);
        let policy = self
            .config
            .retry_override
            .unwrap_or_else(|| category.retry_strategy());
        Ok(category.is_temporary() && task.retries < policy.max_retries)
    }

    /// Logical negation of `can_retry` for jobs stuck in failed/retrying.
    pub async fn should_mark_as_dead(&self, doc_id: &str) -> Result<bool> {
        let Some(task) = self.engine.get_task(TASK_TYPE, doc_id).await? else {
            return Ok(false);
        };
        match SyncStatus::from_str(&task.status) {
            Some(SyncStatus::Failed) | Some(SyncStatus::Retrying) => {
                Ok(!self.can_retry(doc_id).await?)
            }
            _ => Ok(false),
        }
    }

    /// Drop scheduler bookkeeping for jobs that have since gone terminal.
    pub async fn cleanup_completed_jobs(&self) -> Result<usize> {
        let terminal: HashSet<String> = self
            .store
            .get_tasks_by_type(TASK_TYPE)
            .await?
            .into_iter()
            .filter(|t| {
                SyncStatus::from_str(&t.status)
                    .map(|s| s.is_terminal())
                    .unwrap_or(false)
            })
            .map(|t| t.id)
            .collect();
        Ok(self.scheduler.cleanup_completed(|id| terminal.contains(id)))
    }

    /// Delete terminal jobs older than the retention window.
    pub async fn cleanup_expired_jobs(&self) -> Result<u64> {
        Ok(self.engine.cleanup_expired_tasks(self.config.retention).await?)
    }

    /// Periodic cleanup sweep. Returns a token; cancelling it stops the
    /// loop.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; swallow the first tick.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.cleanup_expired_jobs().await {
                            warn!(error = %e, "Expired-task cleanup failed");
                        }
                        match service.cleanup_completed_jobs().await {
                            Ok(dropped) if dropped > 0 => {
                                info!(dropped, "Dropped retry bookkeeping for terminal jobs");
                            }
                            Err(e) => warn!(error = %e, "Retry-log cleanup failed"),
                            _ => {}
                        }
                    }
                }
            }
            debug!("Cleanup loop stopped");
        });

        token
    }
}
