/*
 * docsync-engine - Generic task state-machine engine
 *
 * Tracks long-running tasks through pluggable per-type strategies:
 * - Task model with status, retries, progress and opaque context
 * - StateMachineEngine: create / transition / execute / cancel / retry
 * - RetryScheduler: bounded exponential backoff with true cancellation
 * - TaskStore: in-memory map or durable SQLite table
 *
 * The engine knows nothing about documents or vectors; that lives in
 * docsync-pipeline, which plugs a strategy into this engine.
 */

pub mod engine;
pub mod error;
pub mod retry;
pub mod store;
pub mod strategy;
pub mod task;

pub use engine::{StateMachineEngine, TaskStats};
pub use error::{EngineError, Result};
pub use retry::{RetryScheduler, RetryStats, RetryStrategy, RetryTask};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use strategy::TaskStrategy;
pub use task::Task;
