use delayed_job_record::{JobRecord, QueueStatus};
use delayed_job_spec::{JobSpec, NewJob};
use delayed_job_task_handler::{HandlerPayload, JobHandler};
use getset::Getters;
use tracing::{info, warn};

use crate::errors::{DelayedJobError, Result};
use crate::store::JobStore;

/// Result of a batch enqueue.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct BatchEnqueued {
    /// Number of jobs passed in
    requested: usize,
    /// Rows the store admitted
    jobs: Vec<JobRecord>,
}

impl BatchEnqueued {
    pub fn inserted(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_partial(&self) -> bool {
        self.inserted() < self.requested
    }
}

/// Producer-side helpers: enqueue jobs and inspect a queue.
///
/// ```
/// use delayed_job::{JobContext, JobError, JobHandler, JobSpec, MemoryJobStore, WorkerUtils};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping;
///
/// impl JobHandler for Ping {
///     const KIND: &'static str = "ping";
///     async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
///         Ok(())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let utils = WorkerUtils::new(MemoryJobStore::new());
/// utils.add_job(&Ping, JobSpec::default()).await?;
///
/// let status = utils.status("default").await?;
/// assert_eq!(status.outstanding(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct WorkerUtils<S: JobStore> {
    store: S,
}

impl<S: JobStore> WorkerUtils<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Enqueues one job. Fails with [`DelayedJobError::NotEnqueued`] unless exactly one
    /// row was inserted.
    pub async fn add_job<H: JobHandler>(&self, handler: &H, spec: JobSpec) -> Result<JobRecord> {
        let payload = HandlerPayload::encode(handler)?;
        self.add_raw_job(payload, spec).await
    }

    /// Enqueues a pre-built handler envelope.
    pub async fn add_raw_job(&self, payload: HandlerPayload, spec: JobSpec) -> Result<JobRecord> {
        let new_job = NewJob::new(payload.to_value(), &spec);
        let inserted = self
            .store
            .insert_jobs(std::slice::from_ref(&new_job))
            .await?;

        let Ok([job]) = <[JobRecord; 1]>::try_from(inserted) else {
            warn!(kind = payload.kind(), queue = new_job.queue(), "Job was not enqueued");
            return Err(DelayedJobError::NotEnqueued);
        };

        info!(
            job_id = job.id(),
            kind = payload.kind(),
            queue = job.queue(),
            "Job added"
        );
        Ok(job)
    }

    /// Enqueues every handler with the same spec, in a single insert.
    ///
    /// Succeeds when at least one row was inserted: a store that admits only part of
    /// the batch yields a partial [`BatchEnqueued`] and a warning. An empty slice
    /// inserts nothing and succeeds.
    pub async fn add_jobs<H: JobHandler>(
        &self,
        handlers: &[H],
        spec: JobSpec,
    ) -> Result<BatchEnqueued> {
        let new_jobs = handlers
            .iter()
            .map(|handler| {
                let payload = HandlerPayload::encode(handler)?;
                Ok(NewJob::new(payload.to_value(), &spec))
            })
            .collect::<Result<Vec<_>>>()?;

        if new_jobs.is_empty() {
            return Ok(BatchEnqueued {
                requested: 0,
                jobs: Vec::new(),
            });
        }

        let jobs = self.store.insert_jobs(&new_jobs).await?;
        let batch = BatchEnqueued {
            requested: new_jobs.len(),
            jobs,
        };

        if batch.jobs.is_empty() {
            warn!(kind = H::KIND, requested = batch.requested, "No job of the batch was enqueued");
            return Err(DelayedJobError::NotEnqueued);
        }
        if batch.is_partial() {
            warn!(
                kind = H::KIND,
                requested = batch.requested,
                inserted = batch.inserted(),
                "Only part of the batch was enqueued"
            );
        } else {
            info!(kind = H::KIND, count = batch.inserted(), "Jobs added");
        }

        Ok(batch)
    }

    /// Counts of `queue` at this point in time.
    pub async fn status(&self, queue: &str) -> Result<QueueStatus> {
        self.store.queue_status(queue).await
    }

    /// Unlocks every job held by `worker_id`, for instance after that worker crashed.
    pub async fn release_locks(&self, worker_id: &str) -> Result<u64> {
        let released = self.store.release_locks(worker_id).await?;
        info!(worker_id, released, "Released locks");
        Ok(released)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        self.store.get_job(job_id).await
    }
}
