/*
 * docsync-pipeline - Document-to-vector-index ingestion pipeline
 *
 * Drives documents through split -> embed -> upsert on top of the
 * docsync-engine state machine:
 * - DocumentSyncStrategy: the NEW -> ... -> SYNCED/DEAD transition table
 *   and the three pipeline stages
 * - ErrorCategory + classify: failure taxonomy with per-category retry
 *   policies
 * - SyncService: trigger/inspect/cancel/cleanup surface for callers
 *
 * External collaborators (splitter, embedding provider, vector store,
 * metadata store) are consumed through the port traits in `ports`.
 */

pub mod classify;
pub mod error;
pub mod ports;
pub mod service;
pub mod strategy;
pub mod sync;

pub use classify::{classify, classify_message, ErrorCategory};
pub use error::{Result, SyncError};
pub use ports::{
    point_id, ChunkMeta, DocChunk, Document, EmbeddingProvider, MetadataRepo, Point, Splitter,
    VectorRepo,
};
pub use service::SyncService;
pub use strategy::{next_status, SyncEvent, SyncStatus, TASK_TYPE};
pub use sync::{DocumentSyncStrategy, SyncConfig};
