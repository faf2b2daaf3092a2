use thiserror::Error;

/// Errors that can occur while talking to the job store.
#[derive(Error, Debug)]
pub enum DelayedJobError {
    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    SqlError(#[from] sqlx::Error),

    /// An error occurred while serializing a handler
    #[error("Error while serializing handler: {0}")]
    JsonSerializeError(#[from] serde_json::Error),

    /// The store did not admit any of the rows being enqueued
    #[error("Job could not be enqueued")]
    NotEnqueued,
}

pub type Result<T> = core::result::Result<T, DelayedJobError>;
