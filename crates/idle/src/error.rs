//! Error types for idle tracking.

use std::time::Duration;

use thiserror::Error;

use crate::tracker::IdleListenerId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdleError {
    /// Idle timeouts must be positive and shorter than a day.
    #[error("unsupported idle timeout {0:?}")]
    UnsupportedTimeout(Duration),

    #[error("idle listener {0} is not registered")]
    UnknownListener(IdleListenerId),
}
