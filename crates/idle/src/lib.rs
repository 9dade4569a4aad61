//! Idle and activity tracking.
//!
//! [`IdleTracker`] fires idle listeners after a stretch of inactivity and
//! activity listeners on every qualifying input event. Timers come from a
//! [`Scheduler`]:
//!
//! - [`AlarmScheduler`]: a background timer thread that hands due tasks to
//!   an executor (normally "post to the dispatch thread").
//! - [`ManualScheduler`]: a virtual clock advanced explicitly, for tests and
//!   headless harnesses.

mod alarm;
mod error;
mod scheduler;
mod tracker;

pub use alarm::{AlarmScheduler, Executor};
pub use error::IdleError;
pub use scheduler::{ManualScheduler, Scheduler, SchedulerRef, TimerId};
pub use tracker::{
    ActivityCallback, ActivityListenerId, IdleCallback, IdleConfig, IdleListenerId, IdleTracker,
    DEFAULT_IDLE_TICK, MAX_IDLE_TIMEOUT,
};
