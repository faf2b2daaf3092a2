mod handler;
mod payload;
mod registry;
mod runner;
mod task_result;

pub use delayed_job_ctx::JobContext;
pub use handler::JobHandler;
pub use payload::{DecodeError, HandlerPayload};
pub use registry::HandlerRegistry;
pub use runner::{run_handler, HandlerFuture};
pub use task_result::{HandlerUpdate, JobError, RetryLater, DEFAULT_RETRY_INTERVAL};
