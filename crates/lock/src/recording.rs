//! Lock double that records every call.

use std::sync::{Mutex, PoisonError};

use crate::IntentLock;

/// One observed interaction with a [`RecordingLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCall {
    Acquire,
    Release,
    Unlock,
    Relock,
}

/// An [`IntentLock`] that performs no locking and records calls in order.
#[derive(Default)]
pub struct RecordingLock {
    calls: Mutex<Vec<LockCall>>,
}

impl RecordingLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<LockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `call` was observed.
    pub fn count(&self, call: LockCall) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, call: LockCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

struct Recorded<'a> {
    lock: &'a RecordingLock,
    on_drop: LockCall,
}

impl Drop for Recorded<'_> {
    fn drop(&mut self) {
        self.lock.record(self.on_drop);
    }
}

impl IntentLock for RecordingLock {
    fn run_under_write_intent(&self, task: &mut dyn FnMut()) {
        self.record(LockCall::Acquire);
        let _release = Recorded {
            lock: self,
            on_drop: LockCall::Release,
        };
        task();
    }

    fn run_unlocking(&self, task: &mut dyn FnMut()) {
        self.record(LockCall::Unlock);
        let _relock = Recorded {
            lock: self,
            on_drop: LockCall::Relock,
        };
        task();
    }
}
