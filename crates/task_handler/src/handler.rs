use delayed_job_ctx::JobContext;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

use crate::task_result::JobError;

/// A unit of work that can be stored in the `handler` column and performed later.
///
/// The handler's serialized state is stored under its `KIND` tag, which is how the
/// worker finds the type to deserialize it into. `perform` receives `&mut self` so a
/// handler can update its own state before asking to be retried with
/// [`RetryLater::update_handler`](crate::RetryLater::update_handler).
///
/// ```
/// use delayed_job_task_handler::{JobContext, JobError, JobHandler};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct SendDigest {
///     user_id: i64,
/// }
///
/// impl JobHandler for SendDigest {
///     const KIND: &'static str = "send_digest";
///
///     async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
///         println!("sending digest to {}", self.user_id);
///         Ok(())
///     }
/// }
/// ```
pub trait JobHandler: Serialize + DeserializeOwned + Send + 'static {
    /// Tag stored alongside the payload. This MUST be unique for the whole application.
    const KIND: &'static str;

    /// Performs the work. Returning `Err(JobError::Retry(..))` reschedules the job,
    /// any other error counts as a failed attempt.
    fn perform(&mut self, ctx: &JobContext) -> impl Future<Output = Result<(), JobError>> + Send;
}
