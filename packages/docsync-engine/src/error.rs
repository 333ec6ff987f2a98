use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task not found: {task_type}/{task_id}")]
    TaskNotFound { task_type: String, task_id: String },

    #[error("Task already exists: {task_type}/{task_id}")]
    TaskExists { task_type: String, task_id: String },

    #[error("No strategy registered for task type: {0}")]
    StrategyNotFound(String),

    #[error("Strategy already registered: {0}")]
    StrategyExists(String),

    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn storage<E: std::fmt::Display>(e: E) -> Self {
        Self::Storage(e.to_string())
    }

    pub fn execution<E: std::fmt::Display>(e: E) -> Self {
        Self::ExecutionFailed(e.to_string())
    }

    pub fn task_not_found(task_type: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_type: task_type.into(),
            task_id: task_id.into(),
        }
    }

    pub fn task_exists(task_type: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::TaskExists {
            task_type: task_type.into(),
            task_id: task_id.into(),
        }
    }
}
