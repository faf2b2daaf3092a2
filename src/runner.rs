use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use delayed_job_ctx::JobContext;
use delayed_job_record::JobRecord;
use delayed_job_shutdown_signal::{cancel_on, shutdown_signal};
use delayed_job_task_handler::{DecodeError, HandlerPayload, HandlerRegistry, JobError, RetryLater};
use getset::{CopyGetters, Getters};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

use crate::builder::WorkerOptions;
use crate::errors::DelayedJobError;
use crate::lock::{claim_job, claim_job_excluding, ClaimOptions};
use crate::store::JobStore;
use crate::worker_utils::WorkerUtils;

/// Polls one queue of a [`JobStore`] and runs the jobs it claims, one at a time.
#[derive(Getters, CopyGetters)]
pub struct Worker<S: JobStore> {
    /// Identity written to `locked_by`
    #[getset(get = "pub")]
    pub(crate) worker_id: String,
    /// Only jobs of this queue are claimed
    #[getset(get = "pub")]
    pub(crate) queue: String,
    /// How long to sleep when no job could be claimed
    #[getset(get_copy = "pub")]
    pub(crate) poll_interval: Duration,
    /// Failed attempts after which a job is marked failed
    #[getset(get_copy = "pub")]
    pub(crate) max_attempts: i32,
    /// Polling iterations before `run` returns, 0 means no limit
    #[getset(get_copy = "pub")]
    pub(crate) max_iterations: u64,
    #[getset(get_copy = "pub")]
    pub(crate) claim_options: ClaimOptions,
    #[getset(get = "pub")]
    pub(crate) handlers: Arc<HandlerRegistry>,
    #[getset(get = "pub")]
    pub(crate) store: S,
    /// Cancelled to request a graceful shutdown
    #[getset(skip)]
    pub(crate) shutdown_token: CancellationToken,
    #[getset(get_copy = "pub")]
    pub(crate) listen_os_shutdown_signals: bool,
}

/// What a worker did before it stopped.
#[derive(CopyGetters, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[getset(get_copy = "pub")]
pub struct WorkerStats {
    /// Polling iterations, whether or not a job was claimed
    iterations: u64,
    /// Jobs claimed and executed, whatever their outcome
    jobs_run: u64,
}

#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    #[error("Unexpected error occured while processing job : '{0}'")]
    ProcessJob(#[from] ProcessJobError),
    #[error("Failed to release the locks held by this worker : '{0}'")]
    ReleaseLocks(#[source] DelayedJobError),
}

impl<S: JobStore> Worker<S> {
    /// Starts configuring a worker.
    ///
    /// ```
    /// use delayed_job::{MemoryJobStore, Worker};
    /// use std::time::Duration;
    ///
    /// let worker = Worker::options()
    ///     .store(MemoryJobStore::new())
    ///     .queue("mailers")
    ///     .poll_interval(Duration::from_secs(1))
    ///     .max_attempts(3)
    ///     .init()
    ///     .unwrap();
    /// assert_eq!(worker.queue(), "mailers");
    /// ```
    pub fn options() -> WorkerOptions<S> {
        WorkerOptions::default()
    }

    /// Polls and runs jobs until the iteration budget is spent or shutdown is requested.
    ///
    /// Shutdown is checked between jobs: a running handler is never interrupted.
    /// When it happens, every lock held by this worker is released before returning.
    pub async fn run(&self) -> Result<WorkerStats, WorkerRuntimeError> {
        info!(
            worker_id = %self.worker_id,
            queue = %self.queue,
            "Worker started"
        );

        let signal_listener = self
            .listen_os_shutdown_signals
            .then(|| tokio::spawn(cancel_on(shutdown_signal(), self.shutdown_token.clone())));

        let result = self.job_runner().await;

        if let Some(listener) = signal_listener {
            listener.abort();
        }

        if let Ok(stats) = &result {
            info!(
                worker_id = %self.worker_id,
                "worker shutting down after running {} jobs over {} polling iterations",
                stats.jobs_run,
                stats.iterations,
            );
        }
        result
    }

    async fn job_runner(&self) -> Result<WorkerStats, WorkerRuntimeError> {
        let mut stats = WorkerStats::default();

        loop {
            if self.max_iterations > 0 && stats.iterations >= self.max_iterations {
                debug!(worker_id = %self.worker_id, "Iteration budget reached");
                return Ok(stats);
            }

            if self.shutdown_token.is_cancelled() {
                self.release_own_locks().await?;
                return Ok(stats);
            }

            stats.iterations += 1;
            match process_one_job(self).await? {
                Some(_) => stats.jobs_run += 1,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {},
                        _ = self.shutdown_token.cancelled() => {},
                    }
                }
            }
        }
    }

    /// Runs every job that can be claimed right now, then returns.
    ///
    /// Each job runs at most once per call, so a job rescheduled to run immediately
    /// waits for the next call.
    pub async fn run_once(&self) -> Result<WorkerStats, WorkerRuntimeError> {
        let mut stats = WorkerStats::default();
        let mut already_run = HashSet::new();

        while !self.shutdown_token.is_cancelled() {
            stats.iterations += 1;
            let job = claim_job_excluding(
                &self.store,
                &self.queue,
                &self.worker_id,
                &self.claim_options,
                &already_run,
            )
            .await
            .map_err(ProcessJobError::from)?;
            let Some(job) = job else {
                break;
            };

            already_run.insert(*job.id());
            run_and_release_job(job, self).await?;
            stats.jobs_run += 1;
        }

        self.release_own_locks().await?;
        Ok(stats)
    }

    /// Claims and runs a single job. `None` means nothing could be claimed.
    pub async fn process_next_job(&self) -> Result<Option<JobOutcome>, ProcessJobError> {
        process_one_job(self).await
    }

    /// Asks the worker to stop once the current job is done.
    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Enqueue and inspection helpers sharing this worker's store.
    pub fn create_utils(&self) -> WorkerUtils<S> {
        WorkerUtils::new(self.store.clone())
    }

    async fn release_own_locks(&self) -> Result<u64, WorkerRuntimeError> {
        let released = self
            .store
            .release_locks(&self.worker_id)
            .await
            .map_err(WorkerRuntimeError::ReleaseLocks)?;
        info!(
            worker_id = %self.worker_id,
            released, "Shutting down, released locks held by this worker"
        );
        Ok(released)
    }
}

/// Errors that can occur while claiming or releasing a job.
#[derive(Error, Debug)]
pub enum ProcessJobError {
    #[error("An error occured while releasing a job : '{0}'")]
    ReleaseJobError(#[from] ReleaseJobError),
    #[error("An error occured while fetching a job to run : '{0}'")]
    GetJobError(#[from] DelayedJobError),
}

/// How a claimed job ended up after being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The handler succeeded and the row was deleted
    Completed,
    /// The handler asked to run again later. `failure` is set when the retry also
    /// counted as a failed attempt.
    Rescheduled { failure: Option<FailedAttempt> },
    /// The handler failed
    Failed(FailedAttempt),
    /// The lock was taken over by another worker before the result could be written
    LockLost,
}

#[derive(CopyGetters, Debug, Clone, Copy, PartialEq, Eq)]
#[getset(get_copy = "pub")]
pub struct FailedAttempt {
    /// Failed attempts so far, this one included
    attempts: i32,
    /// Whether the job reached its max attempts and will not run again
    permanently: bool,
}

async fn process_one_job<S: JobStore>(
    worker: &Worker<S>,
) -> Result<Option<JobOutcome>, ProcessJobError> {
    let job = claim_job(
        &worker.store,
        &worker.queue,
        &worker.worker_id,
        &worker.claim_options,
    )
    .await
    .map_err(|e| {
        error!("Could not claim job : {:?}", e);
        e
    })?;

    match job {
        Some(job) => Ok(Some(run_and_release_job(job, worker).await?)),
        None => {
            trace!(worker_id = %worker.worker_id, "No job found");
            Ok(None)
        }
    }
}

/// Runs a claimed job and writes its outcome back to the store.
pub async fn run_and_release_job<S: JobStore>(
    job: JobRecord,
    worker: &Worker<S>,
) -> Result<JobOutcome, ProcessJobError> {
    let start = Instant::now();
    let job_result = run_job(&job, worker).await;
    let duration = start.elapsed();

    let outcome = release_job(job_result, &job, worker, duration)
        .await
        .map_err(|e| {
            error!("Release job error : {:?}", e);
            e
        })?;
    Ok(outcome)
}

/// Why an execution did not succeed.
#[derive(Error, Debug)]
enum RunJobError {
    #[error("Cannot decode handler : {0}")]
    BadHandler(#[from] DecodeError),
    #[error("Handler panicked : {0}")]
    TaskPanic(#[from] tokio::task::JoinError),
    #[error("{0:#}")]
    TaskError(anyhow::Error),
    #[error("Retry requested : {0}")]
    RetryRequested(RetryLater),
}

#[tracing::instrument(
    "run_job",
    skip(job, worker),
    fields(
        job_id = job.id(),
        queue = job.queue().as_str(),
        worker_id = worker.worker_id.as_str(),
        attempts = job.attempts(),
    )
)]
async fn run_job<S: JobStore>(job: &JobRecord, worker: &Worker<S>) -> Result<(), RunJobError> {
    let ctx = JobContext::new(job.clone(), worker.worker_id.clone());
    let task_fut = worker.handlers.runner(job.handler(), ctx)?;

    let job_task = tokio::spawn(task_fut.instrument(Span::current()));

    match job_task.await {
        Err(e) => Err(RunJobError::TaskPanic(e)),
        Ok(Err(JobError::Retry(retry))) => Err(RunJobError::RetryRequested(retry)),
        Ok(Err(JobError::Failed(e))) => Err(RunJobError::TaskError(e)),
        Ok(Ok(())) => Ok(()),
    }
}

/// Error that occurs when a job outcome cannot be written to the store.
#[derive(Error, Debug)]
#[error("Failed to release job '{job_id}'. {source}")]
pub struct ReleaseJobError {
    job_id: i64,
    #[source]
    source: DelayedJobError,
}

async fn release_job<S: JobStore>(
    job_result: Result<(), RunJobError>,
    job: &JobRecord,
    worker: &Worker<S>,
    duration: Duration,
) -> Result<JobOutcome, ReleaseJobError> {
    let job_id = *job.id();
    let worker_id = worker.worker_id.as_str();
    let release_error = |source: DelayedJobError| ReleaseJobError { job_id, source };

    match job_result {
        Ok(()) => {
            let deleted = worker
                .store
                .complete_job(job_id, worker_id)
                .await
                .map_err(release_error)?;
            if !deleted {
                return Ok(lock_lost(job_id, worker_id, "complete"));
            }

            info!(
                job_id,
                duration = duration.as_millis(),
                "Completed job with success"
            );
            Ok(JobOutcome::Completed)
        }
        Err(RunJobError::RetryRequested(retry)) => {
            let interval = retry.interval_or_default();
            let replacement = retry.replacement().map(HandlerPayload::to_value);
            let release_lock = !retry.keeps_lock() && !retry.counts_as_failure();

            let rescheduled = worker
                .store
                .retry_job(
                    job_id,
                    worker_id,
                    interval,
                    replacement.as_ref(),
                    release_lock,
                )
                .await
                .map_err(release_error)?;
            if !rescheduled {
                return Ok(lock_lost(job_id, worker_id, "reschedule"));
            }

            info!(
                job_id,
                retry_in = ?interval,
                handler_replaced = replacement.is_some(),
                keep_lock = retry.keeps_lock(),
                "Job rescheduled"
            );

            if !retry.counts_as_failure() {
                return Ok(JobOutcome::Rescheduled { failure: None });
            }

            let failure = record_failure(job, worker, &retry.to_string(), !retry.keeps_lock())
                .await
                .map_err(release_error)?;
            Ok(match failure {
                Some(failure) => JobOutcome::Rescheduled {
                    failure: Some(failure),
                },
                None => lock_lost(job_id, worker_id, "fail"),
            })
        }
        Err(e) => {
            let failure = record_failure(job, worker, &e.to_string(), true)
                .await
                .map_err(release_error)?;
            Ok(match failure {
                Some(failure) => JobOutcome::Failed(failure),
                None => lock_lost(job_id, worker_id, "fail"),
            })
        }
    }
}

async fn record_failure<S: JobStore>(
    job: &JobRecord,
    worker: &Worker<S>,
    error: &str,
    release_lock: bool,
) -> Result<Option<FailedAttempt>, DelayedJobError> {
    let Some(updated) = worker
        .store
        .fail_job(
            *job.id(),
            &worker.worker_id,
            worker.max_attempts,
            error,
            release_lock,
        )
        .await?
    else {
        return Ok(None);
    };

    let failure = FailedAttempt {
        attempts: *updated.attempts(),
        permanently: updated.is_failed(),
    };

    if failure.permanently {
        error!(
            error,
            job_id = job.id(),
            attempts = failure.attempts,
            handler = %job.handler(),
            "Job max attempts reached"
        );
    } else {
        warn!(
            error,
            job_id = job.id(),
            attempts = failure.attempts,
            max_attempts = worker.max_attempts,
            "Failed job"
        );
    }

    Ok(Some(failure))
}

fn lock_lost(job_id: i64, worker_id: &str, operation: &str) -> JobOutcome {
    warn!(
        job_id,
        worker_id, operation, "Lock was taken over by another worker, result discarded"
    );
    JobOutcome::LockLost
}
