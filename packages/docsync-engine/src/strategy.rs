use crate::error::{EngineError, Result};
use crate::task::Task;
use async_trait::async_trait;
use serde_json::Value;

/// Pluggable per-task-type logic: transition table plus stage execution.
///
/// A strategy owns the status vocabulary of its task type. The engine
/// never writes a status a strategy did not produce, and resolves the
/// strategy by `strategy_id` at registration time rather than by runtime
/// type inspection.
#[async_trait]
pub trait TaskStrategy: Send + Sync {
    /// Task type discriminator; unique within one engine.
    fn strategy_id(&self) -> &str;

    /// Status assigned to freshly created tasks.
    fn initial_status(&self) -> &str;

    /// Statuses with no outgoing transitions.
    fn terminal_statuses(&self) -> Vec<&'static str>;

    fn is_terminal(&self, status: &str) -> bool {
        self.terminal_statuses().contains(&status)
    }

    /// Apply `event` to `task` according to the transition table.
    ///
    /// Returns `Ok(true)` if the transition was applied (the engine then
    /// persists the mutated task), `Ok(false)` if the table rejects the
    /// `(status, event)` pair -- in that case `task` must be unchanged.
    /// An `Err` is treated by the engine like a rejection, plus a log line.
    async fn handle_transition(
        &self,
        task: &mut Task,
        event: &str,
        context: Option<Value>,
    ) -> Result<bool>;

    /// Run the stage logic appropriate for the task's current status.
    async fn execute(&self, task: &Task) -> Result<()>;

    /// Invoked by the engine when `execute` fails, before the error is
    /// re-raised to the caller. This is where failures get classified and
    /// retries get scheduled.
    async fn handle_error(&self, task: &Task, error: &EngineError) -> Result<()>;
}
