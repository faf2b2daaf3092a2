use std::collections::HashSet;
use std::time::Duration;

use delayed_job_record::{JobRecord, DEFAULT_STALE_LOCK_WINDOW};
use getset::CopyGetters;
use tracing::{debug, trace};

use crate::errors::Result;
use crate::store::JobStore;

/// Number of candidates considered per claim.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 5;

#[derive(CopyGetters, Debug, Clone, Copy, PartialEq, Eq)]
#[getset(get_copy = "pub")]
pub struct ClaimOptions {
    /// Locks older than this may be taken over by any worker
    stale_lock_window: Duration,
    /// How many candidates are fetched before trying to lock them
    candidate_limit: usize,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        ClaimOptions {
            stale_lock_window: DEFAULT_STALE_LOCK_WINDOW,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

impl ClaimOptions {
    pub fn new(stale_lock_window: Duration, candidate_limit: usize) -> Self {
        ClaimOptions {
            stale_lock_window,
            candidate_limit: candidate_limit.max(1),
        }
    }
}

/// Claims one runnable job of `queue` for `worker_id`.
///
/// Candidates are tried in order with a conditional lock each. Losing every race
/// returns `Ok(None)`, just like an empty queue.
pub async fn claim_job<S: JobStore>(
    store: &S,
    queue: &str,
    worker_id: &str,
    options: &ClaimOptions,
) -> Result<Option<JobRecord>> {
    claim_job_excluding(store, queue, worker_id, options, &HashSet::new()).await
}

/// Same as [`claim_job`], ignoring the jobs in `excluded`.
pub async fn claim_job_excluding<S: JobStore>(
    store: &S,
    queue: &str,
    worker_id: &str,
    options: &ClaimOptions,
    excluded: &HashSet<i64>,
) -> Result<Option<JobRecord>> {
    let candidates: Vec<i64> = store
        .find_candidates(
            queue,
            worker_id,
            options.stale_lock_window,
            options.candidate_limit + excluded.len(),
        )
        .await?
        .into_iter()
        .filter(|job_id| !excluded.contains(job_id))
        .take(options.candidate_limit)
        .collect();

    if candidates.is_empty() {
        trace!(queue, worker_id, "No candidate job");
        return Ok(None);
    }

    for job_id in candidates {
        debug!(job_id, worker_id, "Attempting to acquire lock");
        if let Some(job) = store
            .acquire_lock(job_id, worker_id, options.stale_lock_window)
            .await?
        {
            debug!(job_id, worker_id, "Lock acquired");
            return Ok(Some(job));
        }
        debug!(job_id, worker_id, "Lock lost to another worker");
    }

    Ok(None)
}
