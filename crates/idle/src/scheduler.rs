//! Timer scheduling boundary and a virtual-clock scheduler.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use switchyard_events::Task;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer:{}", self.0)
    }
}

/// Runs one-shot tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    fn cancel(&self, id: TimerId) -> bool;

    /// The scheduler's notion of "now".
    fn now(&self) -> Instant;
}

pub type SchedulerRef = Arc<dyn Scheduler>;

struct ManualState {
    elapsed: Duration,
    next_id: u64,
    // Keyed by (deadline, id) so equal deadlines fire in scheduling order.
    pending: BTreeMap<(Duration, u64), Task>,
}

/// A scheduler driven by an explicit virtual clock.
///
/// Nothing fires until [`advance`](ManualScheduler::advance) is called; due
/// tasks then run inline on the calling thread, in deadline order, with no
/// internal lock held.
pub struct ManualScheduler {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                next_id: 1,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Move the clock forward by `by`, running every task that falls due,
    /// including tasks scheduled by tasks run during this call.
    pub fn advance(&self, by: Duration) {
        let target = self.elapsed().saturating_add(by);
        loop {
            let due = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let key = state
                    .pending
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                key.and_then(|key| {
                    state.elapsed = state.elapsed.max(key.0);
                    state.pending.remove(&key)
                })
            };
            match due {
                Some(task) => task(),
                None => break,
            }
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.elapsed = state.elapsed.max(target);
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.elapsed.saturating_add(delay);
        state.pending.insert((deadline, id), task);
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let key = state.pending.keys().find(|(_, raw)| *raw == id.0).copied();
        key.and_then(|key| state.pending.remove(&key)).is_some()
    }

    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}
