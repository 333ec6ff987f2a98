use docsync_engine::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures surfaced by the document-sync pipeline and its collaborators.
///
/// Variants mirror the classifier taxonomy so classification can match on
/// types first and only fall back to message sniffing for opaque errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document corrupted: {doc_id}: {reason}")]
    DocumentCorrupted { doc_id: String, reason: String },

    #[error("Document too large: {doc_id} ({size} bytes)")]
    DocumentTooLarge { doc_id: String, size: usize },

    #[error("Document empty: {0}")]
    DocumentEmpty(String),

    #[error("Network connection error: {0}")]
    NetworkConnection(String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    #[error("Metadata store connection error: {0}")]
    DatabaseConnection(String),

    #[error("Metadata store timeout: {0}")]
    DatabaseTimeout(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Vector store connection error: {0}")]
    VectorStoreConnection(String),

    #[error("Vector store over capacity: {0}")]
    VectorStoreCapacity(String),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Embedding rate limited: {0}")]
    EmbeddingRateLimit(String),

    #[error("Embedding quota exhausted: {0}")]
    EmbeddingQuota(String),

    #[error("Invalid embedding input: {0}")]
    EmbeddingInvalidInput(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding count mismatch: expected {expected} vectors, got {got}")]
    EmbeddingCountMismatch { expected: usize, got: usize },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Disk full: {0}")]
    DiskFull(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn document_corrupted(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DocumentCorrupted {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::EmbeddingCountMismatch {
            expected: 12,
            got: 7,
        };
        assert_eq!(
            err.to_string(),
            "Embedding count mismatch: expected 12 vectors, got 7"
        );

        let err = SyncError::DocumentNotFound("doc-1".to_string());
        assert_eq!(err.to_string(), "Document not found: doc-1");
    }

    #[test]
    fn test_engine_error_conversion() {
        let engine_err = EngineError::StrategyNotFound("document_sync".to_string());
        let err: SyncError = engine_err.into();
        assert!(matches!(err, SyncError::Engine(_)));
    }
}
