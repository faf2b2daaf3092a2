use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use serde_json::Value;
use sqlx::FromRow;

/// Default age after which a lock is considered abandoned and may be reclaimed.
pub const DEFAULT_STALE_LOCK_WINDOW: Duration = Duration::from_secs(4 * 60 * 60);

/// `JobRecord` represents one row of the `jobs` table.
///
/// A row is only ever pending, locked, scheduled for a retry, or terminally
/// failed: completed jobs are deleted.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct JobRecord {
    /// Unique, monotonic identifier of the job
    #[builder(default)]
    id: i64,
    /// Tagged handler envelope (`{"kind": ..., "data": ...}`)
    #[builder(default = "serde_json::json!({})")]
    handler: Value,
    /// Logical partition the job belongs to
    #[builder(default = "String::from(\"default\")", setter(into))]
    queue: String,
    /// Lower number means it should run sooner
    #[builder(default = "9")]
    priority: i32,
    /// How many execution attempts have failed so far
    #[builder(default)]
    attempts: i32,
    /// Earliest time the job may run, `None` means immediately
    #[builder(default, setter(strip_option))]
    run_at: Option<DateTime<Utc>>,
    /// When the current lock was acquired
    #[builder(default, setter(strip_option))]
    locked_at: Option<DateTime<Utc>>,
    /// Identity of the worker holding the lock
    #[builder(default, setter(strip_option, into))]
    locked_by: Option<String>,
    /// Set once the job is terminally failed
    #[builder(default, setter(strip_option))]
    failed_at: Option<DateTime<Utc>>,
    /// Why the job terminally failed
    #[builder(default, setter(strip_option, into))]
    error: Option<String>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
}

/// Where a job currently stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Unlocked and due
    Pending,
    /// Unlocked but `run_at` is in the future
    Scheduled,
    /// Held by a worker whose lock is still fresh
    Locked,
    /// Held by a worker for longer than the staleness window
    StaleLock,
    /// Terminally failed
    Failed,
}

impl JobRecord {
    /// Creates a new builder for constructing a `JobRecord`.
    pub fn builder() -> JobRecordBuilder {
        JobRecordBuilder::default()
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// A row is locked iff both lock columns are set.
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some() && self.locked_by.is_some()
    }

    pub fn is_locked_by(&self, worker_id: &str) -> bool {
        self.is_locked() && self.locked_by.as_deref() == Some(worker_id)
    }

    /// Whether the current lock is older than `window`. Unlocked rows are never stale.
    pub fn is_lock_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.locked_at, self.is_locked()) {
            (Some(locked_at), true) => now
                .checked_sub_signed(window_to_chrono(window))
                .is_some_and(|cutoff| locked_at < cutoff),
            _ => false,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at.is_none_or(|run_at| run_at <= now)
    }

    /// Whether `worker_id` may lock this row right now: it must be due, not
    /// failed, and either unlocked, stale, or already held by `worker_id`.
    pub fn is_claimable_by(&self, worker_id: &str, now: DateTime<Utc>, window: Duration) -> bool {
        !self.is_failed()
            && self.is_due(now)
            && (!self.is_locked()
                || self.is_lock_stale(now, window)
                || self.is_locked_by(worker_id))
    }

    pub fn state(&self, now: DateTime<Utc>, window: Duration) -> JobState {
        if self.is_failed() {
            JobState::Failed
        } else if self.is_lock_stale(now, window) {
            JobState::StaleLock
        } else if self.is_locked() {
            JobState::Locked
        } else if self.is_due(now) {
            JobState::Pending
        } else {
            JobState::Scheduled
        }
    }

    /// Records a lock acquired by `worker_id` at `now`.
    pub fn lock(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.locked_at = Some(now);
        self.locked_by = Some(worker_id.to_string());
    }

    pub fn unlock(&mut self) {
        self.locked_at = None;
        self.locked_by = None;
    }

    /// Pushes `run_at` to `now + interval`, optionally swapping the handler envelope.
    pub fn reschedule(&mut self, now: DateTime<Utc>, interval: Duration, handler: Option<Value>) {
        let run_at = now
            .checked_add_signed(window_to_chrono(interval))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.run_at = Some(run_at);
        if let Some(handler) = handler {
            self.handler = handler;
        }
    }

    /// Counts one failed attempt and marks the job terminal once `max_attempts` is reached.
    pub fn record_failure(&mut self, now: DateTime<Utc>, max_attempts: i32, error: &str) {
        self.attempts += 1;
        if self.attempts >= max_attempts {
            self.failed_at = Some(now);
            self.error = Some(error.to_string());
        } else {
            self.failed_at = None;
            self.error = None;
        }
    }
}

impl JobRecordBuilder {
    /// Builds the JobRecord with all configured values.
    pub fn build(self) -> JobRecord {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

fn window_to_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX)
}

/// Point-in-time counts for one queue.
#[derive(CopyGetters, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[getset(get_copy = "pub")]
pub struct QueueStatus {
    outstanding: i64,
    locked: i64,
    failed: i64,
    total: i64,
}

impl QueueStatus {
    /// Builds a status from raw counts; `outstanding` is whatever is neither locked nor failed.
    pub fn from_counts(total: i64, locked: i64, failed: i64) -> Self {
        QueueStatus {
            outstanding: (total - locked - failed).max(0),
            locked,
            failed,
            total,
        }
    }
}
