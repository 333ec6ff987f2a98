use crate::error::SyncError;
use docsync_engine::RetryStrategy;
use serde::{Deserialize, Serialize};

/// Failure taxonomy for the ingestion pipeline.
///
/// Every category carries a fixed temporary/permanent flag and a default
/// retry policy; both are pure functions of the category so retry behavior
/// is auditable without chasing call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkConnection,
    NetworkTimeout,
    NetworkDns,
    DatabaseConnection,
    DatabaseTimeout,
    DatabaseConstraint,
    VectorStoreConnection,
    VectorStoreCapacity,
    VectorStoreInvalidVector,
    EmbeddingRateLimit,
    EmbeddingQuota,
    EmbeddingInvalidInput,
    EmbeddingUnavailable,
    DocumentNotFound,
    DocumentCorrupted,
    DocumentTooLarge,
    DocumentEmpty,
    ResourceMemory,
    ResourceDisk,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkConnection => "network_connection",
            ErrorCategory::NetworkTimeout => "network_timeout",
            ErrorCategory::NetworkDns => "network_dns",
            ErrorCategory::DatabaseConnection => "database_connection",
            ErrorCategory::DatabaseTimeout => "database_timeout",
            ErrorCategory::DatabaseConstraint => "database_constraint",
            ErrorCategory::VectorStoreConnection => "vector_store_connection",
            ErrorCategory::VectorStoreCapacity => "vector_store_capacity",
            ErrorCategory::VectorStoreInvalidVector => "vector_store_invalid_vector",
            ErrorCategory::EmbeddingRateLimit => "embedding_rate_limit",
            ErrorCategory::EmbeddingQuota => "embedding_quota",
            ErrorCategory::EmbeddingInvalidInput => "embedding_invalid_input",
            ErrorCategory::EmbeddingUnavailable => "embedding_unavailable",
            ErrorCategory::DocumentNotFound => "document_not_found",
            ErrorCategory::DocumentCorrupted => "document_corrupted",
            ErrorCategory::DocumentTooLarge => "document_too_large",
            ErrorCategory::DocumentEmpty => "document_empty",
            ErrorCategory::ResourceMemory => "resource_memory",
            ErrorCategory::ResourceDisk => "resource_disk",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let category = match s {
            "network_connection" => ErrorCategory::NetworkConnection,
            "network_timeout" => ErrorCategory::NetworkTimeout,
            "network_dns" => ErrorCategory::NetworkDns,
            "database_connection" => ErrorCategory::DatabaseConnection,
            "database_timeout" => ErrorCategory::DatabaseTimeout,
            "database_constraint" => ErrorCategory::DatabaseConstraint,
            "vector_store_connection" => ErrorCategory::VectorStoreConnection,
            "vector_store_capacity" => ErrorCategory::VectorStoreCapacity,
            "vector_store_invalid_vector" => ErrorCategory::VectorStoreInvalidVector,
            "embedding_rate_limit" => ErrorCategory::EmbeddingRateLimit,
            "embedding_quota" => ErrorCategory::EmbeddingQuota,
            "embedding_invalid_input" => ErrorCategory::EmbeddingInvalidInput,
            "embedding_unavailable" => ErrorCategory::EmbeddingUnavailable,
            "document_not_found" => ErrorCategory::DocumentNotFound,
            "document_corrupted" => ErrorCategory::DocumentCorrupted,
            "document_too_large" => ErrorCategory::DocumentTooLarge,
            "document_empty" => ErrorCategory::DocumentEmpty,
            "resource_memory" => ErrorCategory::ResourceMemory,
            "resource_disk" => ErrorCategory::ResourceDisk,
            "unknown" => ErrorCategory::Unknown,
            _ => return None,
        };
        Some(category)
    }

    /// Transient infrastructure failures retry; structurally bad input and
    /// exhausted quotas need operator or user intervention.
    pub fn is_temporary(&self) -> bool {
        match self {
            ErrorCategory::NetworkConnection
            | ErrorCategory::NetworkTimeout
            | ErrorCategory::NetworkDns
            | ErrorCategory::DatabaseConnection
            | ErrorCategory::DatabaseTimeout
            | ErrorCategory::VectorStoreConnection
            | ErrorCategory::VectorStoreCapacity
            | ErrorCategory::EmbeddingRateLimit
            | ErrorCategory::EmbeddingUnavailable
            | ErrorCategory::ResourceMemory
            | ErrorCategory::ResourceDisk
            | ErrorCategory::Unknown => true,
            ErrorCategory::DatabaseConstraint
            | ErrorCategory::VectorStoreInvalidVector
            | ErrorCategory::EmbeddingQuota
            | ErrorCategory::EmbeddingInvalidInput
            | ErrorCategory::DocumentNotFound
            | ErrorCategory::DocumentCorrupted
            | ErrorCategory::DocumentTooLarge
            | ErrorCategory::DocumentEmpty => false,
        }
    }

    /// Default retry policy for the category. Permanent categories get a
    /// zero-retry policy so exhaustion checks fall out uniformly.
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            ErrorCategory::NetworkConnection
            | ErrorCategory::NetworkTimeout
            | ErrorCategory::NetworkDns => RetryStrategy::new(5, 1000, 30_000),
            ErrorCategory::DatabaseConnection | ErrorCategory::DatabaseTimeout => {
                RetryStrategy::new(5, 1000, 30_000)
            }
            ErrorCategory::VectorStoreConnection => RetryStrategy::new(5, 1000, 30_000),
            ErrorCategory::VectorStoreCapacity => RetryStrategy::new(3, 5000, 60_000),
            ErrorCategory::EmbeddingRateLimit => RetryStrategy::new(3, 2000, 60_000),
            ErrorCategory::EmbeddingUnavailable => RetryStrategy::new(3, 5000, 60_000),
            ErrorCategory::ResourceMemory | ErrorCategory::ResourceDisk => {
                RetryStrategy::new(2, 5000, 60_000)
            }
            ErrorCategory::Unknown => RetryStrategy::new(3, 1000, 30_000),
            _ => RetryStrategy::new(0, 0, 0),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a pipeline error. Typed variants map directly; opaque errors
/// fall back to message patterns; everything else is `Unknown`.
pub fn classify(error: &SyncError) -> ErrorCategory {
    match error {
        SyncError::DocumentNotFound(_) => ErrorCategory::DocumentNotFound,
        SyncError::DocumentCorrupted { .. } => ErrorCategory::DocumentCorrupted,
        SyncError::DocumentTooLarge { .. } => ErrorCategory::DocumentTooLarge,
        SyncError::DocumentEmpty(_) => ErrorCategory::DocumentEmpty,
        SyncError::NetworkConnection(_) => ErrorCategory::NetworkConnection,
        SyncError::NetworkTimeout(_) => ErrorCategory::NetworkTimeout,
        SyncError::DnsResolution(_) => ErrorCategory::NetworkDns,
        SyncError::DatabaseConnection(_) => ErrorCategory::DatabaseConnection,
        SyncError::DatabaseTimeout(_) => ErrorCategory::DatabaseTimeout,
        SyncError::ConstraintViolation(_) => ErrorCategory::DatabaseConstraint,
        SyncError::VectorStoreConnection(_) => ErrorCategory::VectorStoreConnection,
        SyncError::VectorStoreCapacity(_) => ErrorCategory::VectorStoreCapacity,
        SyncError::InvalidVector(_) => ErrorCategory::VectorStoreInvalidVector,
        SyncError::EmbeddingRateLimit(_) => ErrorCategory::EmbeddingRateLimit,
        SyncError::EmbeddingQuota(_) => ErrorCategory::EmbeddingQuota,
        SyncError::EmbeddingInvalidInput(_) => ErrorCategory::EmbeddingInvalidInput,
        // A provider returning the wrong number of vectors is treated as a
        // provider fault, retried a bounded number of times.
        SyncError::EmbeddingCountMismatch { .. } | SyncError::EmbeddingUnavailable(_) => {
            ErrorCategory::EmbeddingUnavailable
        }
        SyncError::OutOfMemory(_) => ErrorCategory::ResourceMemory,
        SyncError::DiskFull(_) => ErrorCategory::ResourceDisk,
        SyncError::Engine(e) => classify_message(&e.to_string()),
        SyncError::Other(e) => classify_message(&format!("{e:#}")),
    }
}

pub fn is_temporary(error: &SyncError) -> bool {
    classify(error).is_temporary()
}

pub fn retry_strategy(error: &SyncError) -> RetryStrategy {
    classify(error).retry_strategy()
}

/// Message-pattern fallback for errors that lost their type (wrapped by
/// anyhow, stringified by the engine, raised by a driver).
pub fn classify_message(message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();

    if msg.contains("econnrefused") || msg.contains("connection refused") {
        ErrorCategory::NetworkConnection
    } else if msg.contains("etimedout") || msg.contains("timed out") || msg.contains("timeout") {
        ErrorCategory::NetworkTimeout
    } else if msg.contains("enotfound") || msg.contains("dns") || msg.contains("name resolution") {
        ErrorCategory::NetworkDns
    } else if msg.contains("unique constraint") || msg.contains("foreign key") {
        ErrorCategory::DatabaseConstraint
    } else if msg.contains("database") && msg.contains("connect") {
        ErrorCategory::DatabaseConnection
    } else if msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests")
    {
        ErrorCategory::EmbeddingRateLimit
    } else if msg.contains("quota") {
        ErrorCategory::EmbeddingQuota
    } else if msg.contains("out of memory") || msg.contains("oom") {
        ErrorCategory::ResourceMemory
    } else if msg.contains("no space left") || msg.contains("disk full") {
        ErrorCategory::ResourceDisk
    } else if msg.contains("connection") || msg.contains("connect") {
        ErrorCategory::NetworkConnection
    } else {
        ErrorCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ErrorCategory] = &[
        ErrorCategory::NetworkConnection,
        ErrorCategory::NetworkTimeout,
        ErrorCategory::NetworkDns,
        ErrorCategory::DatabaseConnection,
        ErrorCategory::DatabaseTimeout,
        ErrorCategory::DatabaseConstraint,
        ErrorCategory::VectorStoreConnection,
        ErrorCategory::VectorStoreCapacity,
        ErrorCategory::VectorStoreInvalidVector,
        ErrorCategory::EmbeddingRateLimit,
        ErrorCategory::EmbeddingQuota,
        ErrorCategory::EmbeddingInvalidInput,
        ErrorCategory::EmbeddingUnavailable,
        ErrorCategory::DocumentNotFound,
        ErrorCategory::DocumentCorrupted,
        ErrorCategory::DocumentTooLarge,
        ErrorCategory::DocumentEmpty,
        ErrorCategory::ResourceMemory,
        ErrorCategory::ResourceDisk,
        ErrorCategory::Unknown,
    ];

    #[test]
    fn test_category_roundtrip() {
        for category in ALL {
            let parsed = ErrorCategory::from_str(category.as_str()).unwrap();
            assert_eq!(*category, parsed);
        }
        assert!(ErrorCategory::from_str("bogus").is_none());
    }

    #[test]
    fn test_typed_classification() {
        assert_eq!(
            classify(&SyncError::NetworkTimeout("read".into())),
            ErrorCategory::NetworkTimeout
        );
        assert_eq!(
            classify(&SyncError::EmbeddingRateLimit("429".into())),
            ErrorCategory::EmbeddingRateLimit
        );
        assert_eq!(
            classify(&SyncError::DocumentNotFound("doc-1".into())),
            ErrorCategory::DocumentNotFound
        );
        assert_eq!(
            classify(&SyncError::EmbeddingCountMismatch {
                expected: 3,
                got: 1
            }),
            ErrorCategory::EmbeddingUnavailable
        );
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(
            classify_message("connect ECONNREFUSED 10.0.0.1:6333"),
            ErrorCategory::NetworkConnection
        );
        assert_eq!(
            classify_message("request timed out after 30s"),
            ErrorCategory::NetworkTimeout
        );
        assert_eq!(
            classify_message("UNIQUE constraint failed: chunks.point_id"),
            ErrorCategory::DatabaseConstraint
        );
        assert_eq!(
            classify_message("HTTP 429 Too Many Requests"),
            ErrorCategory::EmbeddingRateLimit
        );
        assert_eq!(classify_message("something odd"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_opaque_errors_go_through_fallback() {
        let err: SyncError = anyhow::anyhow!("connection refused by vector store").into();
        assert_eq!(classify(&err), ErrorCategory::NetworkConnection);
    }

    #[test]
    fn test_temporary_split() {
        assert!(ErrorCategory::NetworkConnection.is_temporary());
        assert!(ErrorCategory::VectorStoreCapacity.is_temporary());
        assert!(ErrorCategory::EmbeddingRateLimit.is_temporary());
        assert!(ErrorCategory::Unknown.is_temporary());

        assert!(!ErrorCategory::DocumentCorrupted.is_temporary());
        assert!(!ErrorCategory::EmbeddingInvalidInput.is_temporary());
        assert!(!ErrorCategory::DatabaseConstraint.is_temporary());
        assert!(!ErrorCategory::EmbeddingQuota.is_temporary());
    }

    #[test]
    fn test_retry_strategy_defaults() {
        let network = ErrorCategory::NetworkConnection.retry_strategy();
        assert_eq!(network.max_retries, 5);
        assert_eq!(network.base_delay_ms, 1000);

        let rate_limit = ErrorCategory::EmbeddingRateLimit.retry_strategy();
        assert_eq!(rate_limit.max_retries, 3);
        assert_eq!(rate_limit.base_delay_ms, 2000);
        assert_eq!(rate_limit.max_delay_ms, 60_000);

        // Permanent categories retry zero times.
        assert_eq!(ErrorCategory::DocumentCorrupted.retry_strategy().max_retries, 0);
    }

    #[test]
    fn test_permanent_categories_never_retry() {
        for category in ALL {
            if !category.is_temporary() {
                assert_eq!(category.retry_strategy().max_retries, 0, "{category}");
            }
        }
    }
}
