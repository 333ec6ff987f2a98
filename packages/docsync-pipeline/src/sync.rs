//! The document-sync pipeline: split, embed, upsert, mark synced.
//!
//! One `DocumentSyncStrategy` instance is registered with the engine and
//! drives every document task. A retried run re-executes the whole
//! pipeline from the split stage; stage idempotency (deterministic
//! splitter, point ids keyed by `doc_id#chunk_index`, upsert semantics)
//! makes that safe.

use std::sync::Arc;

use async_trait::async_trait;
use docsync_engine::{
    EngineError, RetryScheduler, RetryStrategy, Task, TaskStore, TaskStrategy,
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::classify::{classify, classify_message, ErrorCategory};
use crate::error::{Result, SyncError};
use crate::ports::{
    point_id, ChunkMeta, EmbeddingProvider, MetadataRepo, Point, Splitter, VectorRepo,
};
use crate::strategy::{apply_transition, SyncEvent, SyncStatus, TASK_TYPE};

/// Pipeline tuning knobs. The retry override exists so deployments (and
/// tests) can tighten or loosen backoff globally instead of per category.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Terminal tasks older than this are eligible for the cleanup sweep.
    pub retention: chrono::Duration,
    /// Period of the background cleanup loop.
    pub cleanup_interval: std::time::Duration,
    /// Window size for batch execution.
    pub concurrency: usize,
    /// When set, replaces every category's default retry policy.
    pub retry_override: Option<RetryStrategy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::hours(24),
            cleanup_interval: std::time::Duration::from_secs(60 * 60),
            concurrency: 4,
            retry_override: None,
        }
    }
}

pub struct DocumentSyncStrategy {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<RetryScheduler>,
    splitter: Arc<dyn Splitter>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorRepo>,
    metadata: Arc<dyn MetadataRepo>,
    config: SyncConfig,
}

impl DocumentSyncStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<RetryScheduler>,
        splitter: Arc<dyn Splitter>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorRepo>,
        metadata: Arc<dyn MetadataRepo>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                store,
                scheduler,
                splitter,
                embedder,
                vectors,
                metadata,
                config,
            }),
        }
    }
}

impl SyncInner {
    /// Load, transition, persist. Returns whether the table accepted the
    /// event; a rejection is logged but not an error, matching the
    /// engine's own transition semantics.
    async fn apply_event(
        &self,
        doc_id: &str,
        event: SyncEvent,
        context: Option<Value>,
    ) -> Result<bool> {
        let mut task = self
            .store
            .get_task(TASK_TYPE, doc_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(TASK_TYPE, doc_id))?;

        if !apply_transition(&mut task, event.as_str(), context) {
            warn!(
                doc_id,
                status = %task.status,
                event = %event,
                "Transition rejected by sync table"
            );
            return Ok(false);
        }
        self.store.update_task(&task).await?;
        Ok(true)
    }

    async fn current_retries(&self, doc_id: &str) -> u32 {
        match self.store.get_task(TASK_TYPE, doc_id).await {
            Ok(Some(task)) => task.retries,
            _ => 0,
        }
    }

    fn retry_policy(&self, category: ErrorCategory) -> RetryStrategy {
        self.config
            .retry_override
            .unwrap_or_else(|| category.retry_strategy())
    }
}

/// Run the full pipeline for one document. Emits the matching table event
/// after each stage; any error aborts the remaining stages for this run.
async fn run(inner: Arc<SyncInner>, doc_id: String) -> Result<()> {
    let doc = inner
        .metadata
        .get_doc(&doc_id)
        .await?
        .ok_or_else(|| SyncError::DocumentNotFound(doc_id.clone()))?;

    // Blank documents have nothing to embed; walk the success path with
    // zero chunks and zero vectors.
    if doc.content.trim().is_empty() {
        info!(doc_id, "Document is empty, syncing without embeddings");
        inner.apply_event(&doc_id, SyncEvent::ChunksSaved, None).await?;
        inner
            .apply_event(&doc_id, SyncEvent::VectorsInserted, None)
            .await?;
        inner.metadata.mark_doc_as_synced(&doc_id).await?;
        inner.apply_event(&doc_id, SyncEvent::MetaUpdated, None).await?;
        return Ok(());
    }

    // Stage 1: split and persist chunk metadata.
    let chunks = inner.splitter.split(&doc.content, &doc.name).await?;
    let metas: Vec<ChunkMeta> = chunks
        .iter()
        .map(|c| ChunkMeta {
            point_id: point_id(&doc_id, c.chunk_index),
            doc_id: doc_id.clone(),
            chunk_index: c.chunk_index,
        })
        .collect();
    inner.metadata.add_chunks(&doc_id, metas).await?;
    inner.apply_event(&doc_id, SyncEvent::ChunksSaved, None).await?;
    info!(doc_id, chunks = chunks.len(), "Chunks saved");

    // Stage 2: embed and upsert vectors.
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = inner.embedder.generate(&texts).await?;
    if vectors.len() != texts.len() {
        return Err(SyncError::EmbeddingCountMismatch {
            expected: texts.len(),
            got: vectors.len(),
        });
    }
    let points: Vec<Point> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| Point {
            id: point_id(&doc_id, chunk.chunk_index),
            vector,
            payload: json!({
                "doc_id": doc_id,
                "collection_id": doc.collection_id,
                "chunk_index": chunk.chunk_index,
                "content": chunk.content,
                "title_chain": chunk.title_chain,
            }),
        })
        .collect();
    inner
        .vectors
        .upsert_collection(&doc.collection_id, points)
        .await?;
    inner
        .apply_event(&doc_id, SyncEvent::VectorsInserted, None)
        .await?;
    info!(doc_id, collection_id = %doc.collection_id, "Vectors upserted");

    // Stage 3: flag the document synced.
    inner.metadata.mark_doc_as_synced(&doc_id).await?;
    inner.apply_event(&doc_id, SyncEvent::MetaUpdated, None).await?;
    info!(doc_id, "Document synced");
    Ok(())
}

/// Top-level failure handler: classify, transition to `failed`, then
/// either arm a retry timer or dead-letter the task.
async fn handle_failure(
    inner: Arc<SyncInner>,
    doc_id: String,
    message: String,
    category: ErrorCategory,
) {
    let ctx = json!({
        "error": message,
        "error_category": category.as_str(),
    });
    if let Err(e) = inner.apply_event(&doc_id, SyncEvent::Error, Some(ctx)).await {
        error!(doc_id, error = %e, "Failed to persist error transition");
        return;
    }

    let retries = inner.current_retries(&doc_id).await;
    let policy = inner.retry_policy(category);

    if category.is_temporary() && retries < policy.max_retries {
        warn!(
            doc_id,
            category = %category,
            retries,
            max_retries = policy.max_retries,
            error = %message,
            "Sync failed, scheduling retry"
        );
        let retry_inner = Arc::clone(&inner);
        let retry_doc = doc_id.clone();
        inner.scheduler.schedule_retry(
            &doc_id,
            &message,
            category.as_str(),
            retries,
            policy,
            move || retry_run(retry_inner, retry_doc),
        );
    } else {
        error!(
            doc_id,
            category = %category,
            retries,
            error = %message,
            "Sync failed permanently, dead-lettering"
        );
        if let Err(e) = inner
            .apply_event(&doc_id, SyncEvent::RetriesExceeded, None)
            .await
        {
            error!(doc_id, error = %e, "Failed to persist dead transition");
        }
    }
}

/// Timer callback: move `failed -> retrying`, then re-run the pipeline
/// from the split stage. Boxed to break the type cycle through
/// `handle_failure`'s `schedule_retry` call.
fn retry_run(inner: Arc<SyncInner>, doc_id: String) -> BoxFuture<'static, anyhow::Result<()>> {
    async move {
        let applied = inner
            .apply_event(&doc_id, SyncEvent::Retry, None)
            .await
            .map_err(anyhow::Error::new)?;
        if !applied {
            // The task moved on (cancelled or dead) while the timer was
            // pending; nothing to re-run.
            return Ok(());
        }

        match run(Arc::clone(&inner), doc_id.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                let category = classify(&e);
                handle_failure(inner, doc_id, message.clone(), category).await;
                Err(anyhow::anyhow!(message))
            }
        }
    }
    .boxed()
}

#[async_trait]
impl TaskStrategy for DocumentSyncStrategy {
    fn strategy_id(&self) -> &str {
        TASK_TYPE
    }

    fn initial_status(&self) -> &str {
        SyncStatus::New.as_str()
    }

    fn terminal_statuses(&self) -> Vec<&'static str> {
        vec![SyncStatus::Synced.as_str(), SyncStatus::Dead.as_str()]
    }

    async fn handle_transition(
        &self,
        task: &mut Task,
        event: &str,
        context: Option<Value>,
    ) -> docsync_engine::Result<bool> {
        Ok(apply_transition(task, event, context))
    }

    async fn execute(&self, task: &Task) -> docsync_engine::Result<()> {
        run(Arc::clone(&self.inner), task.id.clone())
            .await
            .map_err(|e| EngineError::Other(anyhow::Error::new(e)))
    }

    async fn handle_error(&self, task: &Task, error: &EngineError) -> docsync_engine::Result<()> {
        let message = error.to_string();
        // Recover the typed pipeline error when the engine preserved it,
        // otherwise classify from the message.
        let category = match error {
            EngineError::Other(e) => e
                .downcast_ref::<SyncError>()
                .map(classify)
                .unwrap_or_else(|| classify_message(&message)),
            _ => classify_message(&message),
        };
        handle_failure(
            Arc::clone(&self.inner),
            task.id.clone(),
            message,
            category,
        )
        .await;
        Ok(())
    }
}
