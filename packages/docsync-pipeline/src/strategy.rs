//! Document-sync status/event domain and its transition table.
//!
//! The table is the single source of truth for which lifecycle moves are
//! legal. Anything not listed is rejected and leaves the task untouched.

use chrono::Utc;
use docsync_engine::Task;
use serde_json::json;

/// Task type discriminator registered with the engine.
pub const TASK_TYPE: &str = "document_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    New,
    SplitOk,
    EmbedOk,
    Synced,
    Failed,
    Retrying,
    Dead,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::New => "new",
            SyncStatus::SplitOk => "split_ok",
            SyncStatus::EmbedOk => "embed_ok",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Retrying => "retrying",
            SyncStatus::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let status = match s {
            "new" => SyncStatus::New,
            "split_ok" => SyncStatus::SplitOk,
            "embed_ok" => SyncStatus::EmbedOk,
            "synced" => SyncStatus::Synced,
            "failed" => SyncStatus::Failed,
            "retrying" => SyncStatus::Retrying,
            "dead" => SyncStatus::Dead,
            _ => return None,
        };
        Some(status)
    }

    /// Terminal statuses: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::Dead)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    ChunksSaved,
    VectorsInserted,
    MetaUpdated,
    Error,
    Retry,
    RetriesExceeded,
    Cancel,
}

impl SyncEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEvent::ChunksSaved => "chunks_saved",
            SyncEvent::VectorsInserted => "vectors_inserted",
            SyncEvent::MetaUpdated => "meta_updated",
            SyncEvent::Error => "error",
            SyncEvent::Retry => "retry",
            SyncEvent::RetriesExceeded => "retries_exceeded",
            SyncEvent::Cancel => "cancel",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let event = match s {
            "chunks_saved" => SyncEvent::ChunksSaved,
            "vectors_inserted" => SyncEvent::VectorsInserted,
            "meta_updated" => SyncEvent::MetaUpdated,
            "error" => SyncEvent::Error,
            "retry" => SyncEvent::Retry,
            "retries_exceeded" => SyncEvent::RetriesExceeded,
            "cancel" => SyncEvent::Cancel,
            _ => return None,
        };
        Some(event)
    }
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authoritative transition table. Returns `None` for any pair the
/// table does not list.
///
/// `Retrying --chunks_saved--> split_ok` re-enters the success path: a
/// retried run re-executes the whole pipeline from the split stage, so its
/// first stage event must be accepted from `retrying`.
pub fn next_status(from: SyncStatus, event: SyncEvent) -> Option<SyncStatus> {
    use SyncEvent as E;
    use SyncStatus as S;

    let to = match (from, event) {
        (S::New, E::ChunksSaved) | (S::Retrying, E::ChunksSaved) => S::SplitOk,
        (S::SplitOk, E::VectorsInserted) => S::EmbedOk,
        (S::EmbedOk, E::MetaUpdated) => S::Synced,
        (S::New, E::Error)
        | (S::SplitOk, E::Error)
        | (S::EmbedOk, E::Error)
        | (S::Retrying, E::Error) => S::Failed,
        (S::Failed, E::Retry) => S::Retrying,
        (S::Failed, E::RetriesExceeded) | (S::Retrying, E::RetriesExceeded) => S::Dead,
        (S::Failed, E::Cancel) | (S::Retrying, E::Cancel) => S::Dead,
        _ => return None,
    };
    Some(to)
}

/// Apply an event to a task in place. Returns `false` (task unchanged) when
/// the current status is unknown, the event is unknown, or the table
/// rejects the pair.
///
/// Effects per event:
/// - `error`: sets the error message and stamps `context.error_category`.
/// - `retry`: `retries += 1`, `last_attempt_at = now`, progress reset.
/// - success events: clear the error and advance progress (25/60/100).
pub fn apply_transition(task: &mut Task, event: &str, context: Option<serde_json::Value>) -> bool {
    let Some(from) = SyncStatus::from_str(&task.status) else {
        return false;
    };
    let Some(ev) = SyncEvent::from_str(event) else {
        return false;
    };
    let Some(to) = next_status(from, ev) else {
        return false;
    };

    match ev {
        SyncEvent::ChunksSaved => {
            task.clear_error();
            task.set_progress(25);
        }
        SyncEvent::VectorsInserted => {
            task.set_progress(60);
        }
        SyncEvent::MetaUpdated => {
            task.mark_completed();
        }
        SyncEvent::Error => {
            let message = context
                .as_ref()
                .and_then(|c| c.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("pipeline error")
                .to_string();
            task.set_error(message);
            if let Some(category) = context
                .as_ref()
                .and_then(|c| c.get("error_category"))
                .and_then(|v| v.as_str())
            {
                if !task.context.is_object() {
                    task.context = json!({});
                }
                if let Some(obj) = task.context.as_object_mut() {
                    obj.insert("error_category".into(), json!(category));
                }
            }
        }
        SyncEvent::Retry => {
            task.record_attempt();
            task.progress = 0;
        }
        SyncEvent::RetriesExceeded | SyncEvent::Cancel => {
            task.completed_at = Some(Utc::now());
        }
    }

    task.set_status(to.as_str());
    true
}
