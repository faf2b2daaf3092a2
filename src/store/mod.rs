//! Persistence of job rows.
//!
//! Every mutating method is a single conditional update: it either applies
//! atomically or reports that nothing matched. Workers rely on this alone for
//! mutual exclusion.

use std::future::Future;
use std::time::Duration;

use delayed_job_record::{JobRecord, QueueStatus};
use delayed_job_spec::NewJob;
use serde_json::Value;

use crate::errors::Result;

pub mod memory;
pub mod pg;

pub use memory::MemoryJobStore;
pub use pg::PgJobStore;

/// A table of jobs shared by every worker pointed at it.
///
/// Time is owned by the store: "now" is whatever the store considers now, and
/// durations are relative to it.
pub trait JobStore: Clone + Send + Sync + 'static {
    /// Ids of at most `limit` jobs of `queue` that `worker_id` could lock right now,
    /// lowest priority value first, ties broken randomly.
    fn find_candidates(
        &self,
        queue: &str,
        worker_id: &str,
        stale_after: Duration,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;

    /// Locks `job_id` for `worker_id` if it is still claimable. `None` means another
    /// worker got there first.
    fn acquire_lock(
        &self,
        job_id: i64,
        worker_id: &str,
        stale_after: Duration,
    ) -> impl Future<Output = Result<Option<JobRecord>>> + Send;

    fn get_job(&self, job_id: i64) -> impl Future<Output = Result<Option<JobRecord>>> + Send;

    /// Deletes a job still locked by `worker_id`. Returns whether a row was deleted.
    fn complete_job(
        &self,
        job_id: i64,
        worker_id: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Sets `run_at = now + interval`, optionally replacing the handler and releasing
    /// the lock. Returns whether the row was still locked by `worker_id`.
    fn retry_job(
        &self,
        job_id: i64,
        worker_id: &str,
        interval: Duration,
        handler: Option<&Value>,
        release_lock: bool,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Counts one failed attempt. Once `attempts >= max_attempts` the job is marked
    /// failed with `error`. Returns the updated row, or `None` if the row is no longer
    /// locked by `worker_id`.
    fn fail_job(
        &self,
        job_id: i64,
        worker_id: &str,
        max_attempts: i32,
        error: &str,
        release_lock: bool,
    ) -> impl Future<Output = Result<Option<JobRecord>>> + Send;

    /// Unlocks every row held by `worker_id`, returning how many were released.
    fn release_locks(&self, worker_id: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Inserts every job in one statement and returns the rows the store admitted.
    fn insert_jobs(&self, jobs: &[NewJob]) -> impl Future<Output = Result<Vec<JobRecord>>> + Send;

    fn queue_status(&self, queue: &str) -> impl Future<Output = Result<QueueStatus>> + Send;
}
