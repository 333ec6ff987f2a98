use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Retry policy attached to an error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStrategy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryStrategy {
    pub const fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// `min(base * 2^attempt, max)`, saturating on overflow.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// A pending delayed re-invocation. Exists only while the timer is armed;
/// removed on execution or explicit cancellation.
#[derive(Debug, Clone)]
pub struct RetryTask {
    pub id: Uuid,
    pub task_id: String,
    pub attempt: u32,
    pub category: String,
    pub scheduled_at: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    token: CancellationToken,
}

/// Aggregate scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    pub scheduled: u64,
    pub active: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: u64,
    succeeded: u64,
    failed: u64,
    cancelled: u64,
}

/// Per-task retry bookkeeping, retained after timers fire so operators can
/// see what a task has been through. Dropped by `cleanup_completed` once
/// the owning task is terminal.
#[derive(Debug, Clone)]
pub struct RetryLog {
    pub attempts: u32,
    pub last_error: String,
    pub last_category: String,
    pub updated_at: DateTime<Utc>,
}

/// Schedules, tracks and cancels delayed re-invocations of a task's
/// execution callback.
///
/// Cancellation is explicit and immediate: the pending-map entry is the
/// claim token, so a timer whose entry was removed by `cancel_all_for_task`
/// never runs its callback, even when the delay has already elapsed.
pub struct RetryScheduler {
    pending: Arc<DashMap<Uuid, RetryTask>>,
    history: Arc<DashMap<String, RetryLog>>,
    counters: Arc<Mutex<Counters>>,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            history: Arc::new(DashMap::new()),
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    /// Arm a cancellable timer that re-invokes `callback` after the backoff
    /// delay for `attempt`. Returns the retry-task id immediately; the
    /// callback fires on the scheduler's own clock.
    pub fn schedule_retry<F, Fut>(
        &self,
        task_id: &str,
        error: &str,
        category: &str,
        attempt: u32,
        strategy: RetryStrategy,
        callback: F,
    ) -> Uuid
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let delay = strategy.backoff_delay(attempt);
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let now = Utc::now();

        let retry_task = RetryTask {
            id,
            task_id: task_id.to_string(),
            attempt,
            category: category.to_string(),
            scheduled_at: now,
            fire_at: now + chrono::Duration::milliseconds(delay.as_millis() as i64),
            token: token.clone(),
        };
        self.pending.insert(id, retry_task);
        self.history.insert(
            task_id.to_string(),
            RetryLog {
                attempts: attempt + 1,
                last_error: error.to_string(),
                last_category: category.to_string(),
                updated_at: now,
            },
        );
        self.counters.lock().scheduled += 1;

        info!(
            task_id, category, attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );

        let pending = self.pending.clone();
        let counters = self.counters.clone();
        let owner = task_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(task_id = %owner, "Retry cancelled while waiting");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // The map entry is the execution claim: if cancel_all_for_task
            // removed it between the sleep elapsing and this point, the
            // callback must not run.
            if pending.remove(&id).is_none() || token.is_cancelled() {
                debug!(task_id = %owner, "Retry cancelled after delay elapsed, skipping");
                return;
            }

            match callback().await {
                Ok(()) => {
                    counters.lock().succeeded += 1;
                    debug!(task_id = %owner, attempt, "Retry callback completed");
                }
                Err(e) => {
                    // Caught here so a failing callback never tears down the
                    // scheduler; the strategy re-classifies on its own path.
                    counters.lock().failed += 1;
                    error!(task_id = %owner, attempt, error = %e, "Retry callback failed");
                }
            }
        });

        id
    }

    /// Cancel every pending timer for `task_id`, returning how many were
    /// cancelled. A cancelled callback never executes afterwards.
    pub fn cancel_all_for_task(&self, task_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.value().task_id == task_id)
            .map(|entry| *entry.key())
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if let Some((_, task)) = self.pending.remove(&id) {
                task.token.cancel();
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            self.counters.lock().cancelled += cancelled as u64;
            warn!(task_id, cancelled, "Cancelled pending retries");
        }
        cancelled
    }

    /// Pending retries for one task, soonest first.
    pub fn pending_for_task(&self, task_id: &str) -> Vec<RetryTask> {
        let mut tasks: Vec<RetryTask> = self
            .pending
            .iter()
            .filter(|entry| entry.value().task_id == task_id)
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.fire_at);
        tasks
    }

    pub fn stats(&self) -> RetryStats {
        let counters = self.counters.lock();
        RetryStats {
            scheduled: counters.scheduled,
            active: self.pending.len(),
            succeeded: counters.succeeded,
            failed: counters.failed,
            cancelled: counters.cancelled,
        }
    }

    pub fn retry_log(&self, task_id: &str) -> Option<RetryLog> {
        self.history.get(task_id).map(|entry| entry.value().clone())
    }

    /// Drop bookkeeping for tasks the caller reports as done (terminal in
    /// the owning engine) and with no timer still pending. Returns the
    /// number of log entries removed.
    pub fn cleanup_completed<F>(&self, is_done: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.history.len();
        self.history.retain(|task_id, _| {
            let has_pending = self
                .pending
                .iter()
                .any(|entry| entry.value().task_id == *task_id);
            has_pending || !is_done(task_id)
        });
        before - self.history.len()
    }
}
