use delayed_job_record::JobRecord;
use getset::Getters;

/// What a handler can see about the job it is performing.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct JobContext {
    /// The claimed row, as it was when the lock was acquired
    job: JobRecord,
    /// Identity of the worker holding the lock
    worker_id: String,
}

impl JobContext {
    pub fn new(job: JobRecord, worker_id: String) -> Self {
        JobContext { job, worker_id }
    }

    pub fn job_id(&self) -> i64 {
        *self.job.id()
    }

    /// Number of attempts that already failed before this one.
    pub fn attempts(&self) -> i32 {
        *self.job.attempts()
    }
}
