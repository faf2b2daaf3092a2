use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use delayed_job_record::{JobRecord, QueueStatus};
use delayed_job_spec::NewJob;
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::debug;

use super::JobStore;
use crate::clock::{Clock, SystemClock};
use crate::errors::Result;

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    rows: BTreeMap<i64, JobRecord>,
}

/// An in-process job table.
///
/// Each operation runs under one lock, which gives it the same all-or-nothing
/// behavior as a single conditional update. Clones share the same table.
#[derive(Clone, Debug)]
pub struct MemoryJobStore<C: Clock = SystemClock> {
    state: Arc<Mutex<MemoryState>>,
    clock: C,
    max_rows: Option<usize>,
}

impl Default for MemoryJobStore<SystemClock> {
    fn default() -> Self {
        MemoryJobStore::new()
    }
}

impl MemoryJobStore<SystemClock> {
    pub fn new() -> Self {
        MemoryJobStore::with_clock(SystemClock)
    }
}

impl<C: Clock> MemoryJobStore<C> {
    pub fn with_clock(clock: C) -> Self {
        MemoryJobStore {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
            max_rows: None,
        }
    }

    /// Caps the table size. Inserts beyond the cap are silently dropped, the rest of
    /// the batch still lands.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Every row currently stored, in id order.
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state().rows.values().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the row if it is locked by `worker_id`.
    fn with_owned_row<T>(
        &self,
        job_id: i64,
        worker_id: &str,
        f: impl FnOnce(&mut JobRecord) -> T,
    ) -> Option<T> {
        let mut state = self.state();
        let result = state
            .rows
            .get_mut(&job_id)
            .filter(|job| job.locked_by().as_deref() == Some(worker_id))
            .map(f);
        result
    }
}

impl<C: Clock> JobStore for MemoryJobStore<C> {
    async fn find_candidates(
        &self,
        queue: &str,
        worker_id: &str,
        stale_after: Duration,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let now = self.clock.now();
        let mut candidates: Vec<(i32, i64)> = self
            .state()
            .rows
            .values()
            .filter(|job| job.queue() == queue && job.is_claimable_by(worker_id, now, stale_after))
            .map(|job| (*job.priority(), *job.id()))
            .collect();

        candidates.shuffle(&mut rand::rng());
        candidates.sort_by_key(|(priority, _)| *priority);

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|(_, id)| id)
            .collect())
    }

    async fn acquire_lock(
        &self,
        job_id: i64,
        worker_id: &str,
        stale_after: Duration,
    ) -> Result<Option<JobRecord>> {
        let now = self.clock.now();
        let mut state = self.state();
        let Some(job) = state.rows.get_mut(&job_id) else {
            return Ok(None);
        };
        if !job.is_claimable_by(worker_id, now, stale_after) {
            debug!(job_id, worker_id, "Conditional lock matched no row");
            return Ok(None);
        }

        job.lock(worker_id, now);
        Ok(Some(job.clone()))
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        Ok(self.state().rows.get(&job_id).cloned())
    }

    async fn complete_job(&self, job_id: i64, worker_id: &str) -> Result<bool> {
        let mut state = self.state();
        let owned = state
            .rows
            .get(&job_id)
            .is_some_and(|job| job.locked_by().as_deref() == Some(worker_id));
        if owned {
            state.rows.remove(&job_id);
        }
        Ok(owned)
    }

    async fn retry_job(
        &self,
        job_id: i64,
        worker_id: &str,
        interval: Duration,
        handler: Option<&Value>,
        release_lock: bool,
    ) -> Result<bool> {
        let now = self.clock.now();
        let updated = self.with_owned_row(job_id, worker_id, |job| {
            job.reschedule(now, interval, handler.cloned());
            if release_lock {
                job.unlock();
            }
        });
        Ok(updated.is_some())
    }

    async fn fail_job(
        &self,
        job_id: i64,
        worker_id: &str,
        max_attempts: i32,
        error: &str,
        release_lock: bool,
    ) -> Result<Option<JobRecord>> {
        let now = self.clock.now();
        Ok(self.with_owned_row(job_id, worker_id, |job| {
            job.record_failure(now, max_attempts, error);
            if release_lock {
                job.unlock();
            }
            job.clone()
        }))
    }

    async fn release_locks(&self, worker_id: &str) -> Result<u64> {
        let mut state = self.state();
        let mut released = 0;
        for job in state.rows.values_mut() {
            if job.locked_by().as_deref() == Some(worker_id) {
                job.unlock();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn insert_jobs(&self, jobs: &[NewJob]) -> Result<Vec<JobRecord>> {
        let now = self.clock.now();
        let mut state = self.state();
        let mut inserted = Vec::with_capacity(jobs.len());

        for new_job in jobs {
            if self.max_rows.is_some_and(|max| state.rows.len() >= max) {
                debug!(max_rows = ?self.max_rows, "Table full, dropping row");
                continue;
            }

            state.last_id += 1;
            let mut builder = JobRecord::builder()
                .id(state.last_id)
                .handler(new_job.handler().clone())
                .queue(new_job.queue().clone())
                .priority(*new_job.priority())
                .created_at(now);
            if let Some(run_at) = *new_job.run_at() {
                builder = builder.run_at(run_at);
            }
            let job = builder.build();

            state.rows.insert(*job.id(), job.clone());
            inserted.push(job);
        }

        Ok(inserted)
    }

    async fn queue_status(&self, queue: &str) -> Result<QueueStatus> {
        let state = self.state();
        let (mut total, mut locked, mut failed) = (0, 0, 0);
        for job in state.rows.values().filter(|job| job.queue() == queue) {
            total += 1;
            if job.is_failed() {
                failed += 1;
            }
            if job.locked_at().is_some() {
                locked += 1;
            }
        }
        Ok(QueueStatus::from_counts(total, locked, failed))
    }
}
