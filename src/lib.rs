//! A database-backed job queue.
//!
//! Producers add jobs to a shared `jobs` table with [`WorkerUtils`]. Any number of
//! [`Worker`]s, in any number of processes, poll that table and claim one job at a
//! time with an atomic conditional update on the lock columns. A claimed job is
//! performed by its [`JobHandler`] and then deleted on success, rescheduled on
//! [`RetryLater`], or charged a failed attempt until `max_attempts` marks it failed.
//!
//! Locks older than the stale lock window (4 hours by default) are considered
//! abandoned and may be taken over, which is the only crash recovery there is.
//!
//! ```no_run
//! use delayed_job::{JobContext, JobError, JobHandler, JobSpec, PgJobStore, Worker};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct HelloWorld {
//!     name: String,
//! }
//!
//! impl JobHandler for HelloWorld {
//!     const KIND: &'static str = "hello_world";
//!
//!     async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
//!         println!("Hello {}", self.name);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgJobStore::connect("postgres://localhost/mydb", "delayed_job").await?;
//! store.migrate().await?;
//!
//! let worker = Worker::options()
//!     .store(store)
//!     .define_job::<HelloWorld>()
//!     .init()?;
//!
//! worker
//!     .create_utils()
//!     .add_job(&HelloWorld { name: "world".into() }, JobSpec::default())
//!     .await?;
//!
//! worker.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod clock;
pub mod errors;
pub mod lock;
pub mod runner;
pub mod store;
mod utils;
pub mod worker_utils;

pub use crate::builder::{WorkerBuildError, WorkerOptions, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
pub use crate::errors::{DelayedJobError, Result};
pub use crate::lock::{claim_job, claim_job_excluding, ClaimOptions};
pub use crate::runner::{
    FailedAttempt, JobOutcome, ProcessJobError, ReleaseJobError, Worker, WorkerRuntimeError,
    WorkerStats,
};
pub use crate::store::{JobStore, MemoryJobStore, PgJobStore};
pub use crate::worker_utils::{BatchEnqueued, WorkerUtils};

pub use delayed_job_ctx::JobContext;
pub use delayed_job_migrations::MigrateError;
pub use delayed_job_record::{JobRecord, JobState, QueueStatus, DEFAULT_STALE_LOCK_WINDOW};
pub use delayed_job_spec::{JobSpec, JobSpecBuilder, NewJob, DEFAULT_PRIORITY, DEFAULT_QUEUE};
pub use delayed_job_task_handler::{
    DecodeError, HandlerPayload, HandlerRegistry, HandlerUpdate, JobError, JobHandler, RetryLater,
    DEFAULT_RETRY_INTERVAL,
};
