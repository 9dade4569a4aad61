//! Reentrant write-intent lock with shared readers.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::IntentLock;

#[derive(Default)]
struct State {
    writer: Option<ThreadId>,
    depth: usize,
    readers: HashMap<ThreadId, usize>,
}

impl State {
    fn writable_by(&self, me: ThreadId) -> bool {
        match self.writer {
            Some(owner) => owner == me,
            None => self.readers.keys().all(|reader| *reader == me),
        }
    }

    fn readable_by(&self, me: ThreadId) -> bool {
        self.writer.map_or(true, |owner| owner == me)
    }
}

/// A process-wide intent lock.
///
/// Write intent is exclusive and reentrant on the owning thread. Reads are
/// shared between threads and excluded by another thread's write intent;
/// the write-intent holder may read freely.
#[derive(Default)]
pub struct ProcessIntentLock {
    state: Mutex<State>,
    changed: Condvar,
}

impl ProcessIntentLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
        ready: impl Fn(&State) -> bool,
    ) -> MutexGuard<'a, State> {
        while !ready(&state) {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    /// Whether the calling thread currently holds write intent.
    pub fn holds_write_intent(&self) -> bool {
        self.lock_state().writer == Some(thread::current().id())
    }

    /// Run `f` with shared read access.
    pub fn read<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = thread::current().id();
        let state = self.lock_state();
        let mut state = self.wait_until(state, |s| s.readable_by(me));
        *state.readers.entry(me).or_insert(0) += 1;
        drop(state);

        let _guard = ReadGuard { lock: self, me };
        f()
    }

    fn acquire_write(&self, me: ThreadId, depth: usize) {
        let state = self.lock_state();
        let mut state = self.wait_until(state, |s| s.writable_by(me));
        state.writer = Some(me);
        state.depth += depth;
    }
}

struct ReadGuard<'a> {
    lock: &'a ProcessIntentLock,
    me: ThreadId,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.lock_state();
        if let Some(count) = state.readers.get_mut(&self.me) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&self.me);
            }
        }
        drop(state);
        self.lock.changed.notify_all();
    }
}

struct WriteGuard<'a> {
    lock: &'a ProcessIntentLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.lock_state();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.writer = None;
        }
        drop(state);
        self.lock.changed.notify_all();
    }
}

/// Restores a released write-intent hold, including after a panic.
struct RestoreGuard<'a> {
    lock: &'a ProcessIntentLock,
    me: ThreadId,
    depth: usize,
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.lock.acquire_write(self.me, self.depth);
    }
}

impl IntentLock for ProcessIntentLock {
    fn run_under_write_intent(&self, task: &mut dyn FnMut()) {
        self.acquire_write(thread::current().id(), 1);
        let _guard = WriteGuard { lock: self };
        task();
    }

    fn run_unlocking(&self, task: &mut dyn FnMut()) {
        let me = thread::current().id();
        let mut state = self.lock_state();
        if state.writer != Some(me) {
            drop(state);
            task();
            return;
        }
        let depth = std::mem::take(&mut state.depth);
        state.writer = None;
        drop(state);
        self.changed.notify_all();
        tracing::trace!(depth, "Released write intent");

        let _restore = RestoreGuard {
            lock: self,
            me,
            depth,
        };
        task();
    }
}
