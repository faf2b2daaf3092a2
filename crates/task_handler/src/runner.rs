use delayed_job_ctx::JobContext;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::handler::JobHandler;
use crate::payload::{DecodeError, HandlerPayload};
use crate::task_result::{HandlerUpdate, JobError};

/// A decoded handler ready to be performed.
pub type HandlerFuture = BoxFuture<'static, Result<(), JobError>>;

/// Deserializes `data` into `H` and returns the future performing it.
///
/// A retry asking to keep the handler's current state gets that state encoded into
/// an explicit replacement envelope, so callers only ever see `Keep` or `Replace`.
pub fn run_handler<H: JobHandler>(data: Value, ctx: JobContext) -> Result<HandlerFuture, DecodeError> {
    let mut handler: H =
        serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload {
            kind: H::KIND.to_string(),
            source,
        })?;

    Ok(async move {
        match handler.perform(&ctx).await {
            Err(JobError::Retry(retry)) if *retry.handler() == HandlerUpdate::Current => {
                let payload = HandlerPayload::encode(&handler)?;
                Err(JobError::Retry(retry.replace_handler(payload)))
            }
            result => result,
        }
    }
    .boxed())
}
