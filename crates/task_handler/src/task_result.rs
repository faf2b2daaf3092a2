use std::fmt::{Debug, Display};
use std::time::Duration;

use getset::{CopyGetters, Getters};
use thiserror::Error;

use crate::payload::HandlerPayload;

/// Interval applied to a retry that does not specify one.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// What happens to the stored handler when a job is rescheduled.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum HandlerUpdate {
    /// Leave the stored envelope untouched
    #[default]
    Keep,
    /// Store the handler's state as it is after `perform` returned
    Current,
    /// Store this envelope instead
    Replace(HandlerPayload),
}

/// The retry signal: asks the worker to run the job again later instead of counting
/// the attempt as a plain failure.
///
/// ```
/// use delayed_job_task_handler::RetryLater;
/// use std::time::Duration;
///
/// let retry = RetryLater::after(Duration::from_secs(60 * 60))
///     .update_handler()
///     .count_as_failure();
/// assert_eq!(retry.interval_or_default(), Duration::from_secs(3600));
/// ```
#[derive(Getters, CopyGetters, Debug, Clone, PartialEq, Eq)]
pub struct RetryLater {
    #[getset(get_copy = "pub")]
    interval: Option<Duration>,
    #[getset(get = "pub")]
    handler: HandlerUpdate,
    count_as_failure: bool,
    keep_lock: bool,
    #[getset(get = "pub")]
    message: Option<String>,
}

impl Default for RetryLater {
    fn default() -> Self {
        RetryLater::new()
    }
}

impl RetryLater {
    /// Retry after [`DEFAULT_RETRY_INTERVAL`], keeping the stored handler and releasing the lock.
    pub fn new() -> Self {
        RetryLater {
            interval: None,
            handler: HandlerUpdate::Keep,
            count_as_failure: false,
            keep_lock: false,
            message: None,
        }
    }

    pub fn after(interval: Duration) -> Self {
        RetryLater {
            interval: Some(interval),
            ..RetryLater::new()
        }
    }

    /// Persist the handler's own state, as mutated by `perform`.
    pub fn update_handler(mut self) -> Self {
        self.handler = HandlerUpdate::Current;
        self
    }

    /// Persist another handler envelope in place of the current one.
    pub fn replace_handler(mut self, payload: HandlerPayload) -> Self {
        self.handler = HandlerUpdate::Replace(payload);
        self
    }

    /// Also count this attempt as a failure: `attempts` is incremented and the job
    /// becomes terminal when it reaches the worker's max attempts.
    pub fn count_as_failure(mut self) -> Self {
        self.count_as_failure = true;
        self
    }

    /// Leave the row locked by this worker after rescheduling.
    pub fn keep_lock(mut self) -> Self {
        self.keep_lock = true;
        self
    }

    /// Message recorded as the job error if this retry ends up being terminal.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn counts_as_failure(&self) -> bool {
        self.count_as_failure
    }

    pub fn keeps_lock(&self) -> bool {
        self.keep_lock
    }

    pub fn interval_or_default(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_RETRY_INTERVAL)
    }

    /// The envelope to store, if the handler should be replaced.
    pub fn replacement(&self) -> Option<&HandlerPayload> {
        match &self.handler {
            HandlerUpdate::Replace(payload) => Some(payload),
            HandlerUpdate::Keep | HandlerUpdate::Current => None,
        }
    }
}

impl Display for RetryLater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "retry requested in {:?}", self.interval_or_default()),
        }
    }
}

/// Everything a handler can return instead of `Ok(())`.
#[derive(Error, Debug)]
pub enum JobError {
    /// Reschedule the job
    #[error("{0}")]
    Retry(RetryLater),
    /// The attempt failed
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl JobError {
    pub fn failed(message: impl Display + Debug + Send + Sync + 'static) -> Self {
        JobError::Failed(anyhow::Error::msg(message))
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, JobError::Retry(_))
    }
}

impl From<RetryLater> for JobError {
    fn from(retry: RetryLater) -> Self {
        JobError::Retry(retry)
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Failed(e.into())
    }
}
