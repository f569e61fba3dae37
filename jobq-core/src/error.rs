use thiserror::Error;

/// Enumeration of errors surfaced by queue operations.
///
/// A target row being in the wrong state for an operation (e.g. cancelling a
/// job that already started) is not an error: those operations return `false`
/// and leave the row alone.
#[derive(Error, Debug)]
pub enum QueueError {
    /// An enqueue argument failed validation. Surfaced to the caller, never
    /// retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation referenced a job id that does not exist.
    #[error("no export job with id {0}")]
    NotFound(i64),
    #[error("job store error: {0}")]
    Database(#[from] sqlx::Error),
}
