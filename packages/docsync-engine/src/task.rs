use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tracked unit of work inside the engine.
///
/// `status` is an opaque string whose meaning belongs to the owning
/// strategy's transition table; the engine itself only distinguishes
/// terminal from non-terminal statuses (and asks the strategy which is
/// which). Exactly one `Task` exists per `(task_type, id)` pair.
///
/// Timestamps serialize as epoch milliseconds so durable stores record
/// the same wire shape that in-memory callers observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Discriminator selecting which strategy governs this task.
    pub task_type: String,
    pub status: String,
    /// Incremented only on a failed -> retrying transition.
    pub retries: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Changes on every mutation.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Last failure message, cleared on successful stage completion.
    pub error: Option<String>,
    /// 0-100, monotone within one pipeline run.
    pub progress: u8,
    /// Opaque payload owned by the strategy (doc id, collection id, ...).
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Task {
    pub fn new(
        task_type: impl Into<String>,
        id: impl Into<String>,
        initial_status: impl Into<String>,
        context: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type: task_type.into(),
            status: initial_status.into(),
            retries: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_attempt_at: None,
            error: None,
            progress: 0,
            context: context.unwrap_or(serde_json::Value::Null),
        }
    }

    /// Bump `updated_at`. Every mutation path goes through this.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.touch();
    }

    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.touch();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.touch();
    }

    pub fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.touch();
        }
    }

    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.progress = 100;
        self.updated_at = now;
    }

    /// Record a retry attempt: count it and stamp the attempt time.
    pub fn record_attempt(&mut self) {
        let now = Utc::now();
        self.retries += 1;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new("document_sync", "doc-1", "new", None);

        assert_eq!(task.id, "doc-1");
        assert_eq!(task.task_type, "document_sync");
        assert_eq!(task.status, "new");
        assert_eq!(task.retries, 0);
        assert_eq!(task.progress, 0);
        assert_eq!(task.error, None);
        assert_eq!(task.started_at, None);
        assert_eq!(task.completed_at, None);
        assert_eq!(task.context, serde_json::Value::Null);
    }

    #[test]
    fn test_task_mutations_bump_updated_at() {
        let mut task = Task::new("document_sync", "doc-1", "new", None);
        let before = task.updated_at;

        task.set_status("split_ok");
        assert!(task.updated_at >= before);
        assert_eq!(task.status, "split_ok");
    }

    #[test]
    fn test_record_attempt_increments_retries() {
        let mut task = Task::new("document_sync", "doc-1", "failed", None);

        task.record_attempt();
        assert_eq!(task.retries, 1);
        assert!(task.last_attempt_at.is_some());

        task.record_attempt();
        assert_eq!(task.retries, 2);
    }

    #[test]
    fn test_progress_clamped() {
        let mut task = Task::new("document_sync", "doc-1", "new", None);
        task.set_progress(250);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_mark_started_is_idempotent() {
        let mut task = Task::new("document_sync", "doc-1", "new", None);
        task.mark_started();
        let first = task.started_at;
        task.mark_started();
        assert_eq!(task.started_at, first);
    }

    #[test]
    fn test_timestamps_serialize_as_epoch_millis() {
        let task = Task::new("document_sync", "doc-1", "new", None);
        let json = serde_json::to_value(&task).unwrap();

        assert!(json["created_at"].is_i64());
        assert_eq!(json["created_at"].as_i64(), Some(task.created_at.timestamp_millis()));
        assert!(json["started_at"].is_null());

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.created_at.timestamp_millis(), task.created_at.timestamp_millis());
    }
}
