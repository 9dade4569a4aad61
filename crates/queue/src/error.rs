//! Error types for the toolkit queue boundary.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The toolkit queue was closed; no further events are accepted.
    #[error("toolkit queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, QueueError>;
