//! Error and failure types for the dispatch core.

use std::fmt;

use switchyard_events::EventId;
use switchyard_idle::IdleError;
use switchyard_queue::QueueError;
use thiserror::Error;

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors returned to dispatcher callers.
///
/// Handler failures are never returned here; they are reported through the
/// [`ReportSink`](crate::ReportSink) and the loop carries on.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// More key events were dispatched than were ever posted. The queue can
    /// no longer be trusted and the loop stops.
    #[error("key event counter violated at event {event}: dispatched {dispatched} > posted {posted}")]
    ConsistencyViolation {
        posted: u64,
        dispatched: u64,
        event: EventId,
    },

    #[error("dispatcher is already initialized")]
    AlreadyInitialized,

    #[error("dispatcher is not initialized")]
    NotInitialized,

    #[error("an intent lock manager is already installed")]
    LockManagerInstalled,

    #[error("event {0} is not a mouse event")]
    NotAMouseEvent(EventId),

    #[error(transparent)]
    Idle(#[from] IdleError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Where in the dispatch cycle a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PreInterceptor,
    Route,
    PostInterceptor,
    FocusContinuation,
    ActivityListener,
    ReadyCallback,
    Task,
    Delivery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PreInterceptor => "pre_interceptor",
            Stage::Route => "route",
            Stage::PostInterceptor => "post_interceptor",
            Stage::FocusContinuation => "focus_continuation",
            Stage::ActivityListener => "activity_listener",
            Stage::ReadyCallback => "ready_callback",
            Stage::Task => "task",
            Stage::Delivery => "delivery",
        };
        f.write_str(name)
    }
}

/// A handler failure caught at the narrowest boundary around it.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub stage: Stage,
    /// The event being delivered, if any.
    pub event: Option<EventId>,
    pub cause: String,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event {
            Some(event) => write!(f, "{} failed for event {}: {}", self.stage, event, self.cause),
            None => write!(f, "{} failed: {}", self.stage, self.cause),
        }
    }
}
