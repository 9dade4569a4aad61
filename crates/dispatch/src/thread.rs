//! Identity of the dispatch thread.

use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// The thread currently running the dispatch loop.
///
/// Unbound until a loop entry point runs; an unbound dispatcher has no
/// dispatch thread, so every caller counts as off-thread. Re-resolved on
/// every entry and every dispatch, so a loop moved to another thread is
/// picked up before it blocks on the queue.
#[derive(Default)]
pub(crate) struct DispatchThread {
    id: Mutex<Option<ThreadId>>,
}

impl DispatchThread {
    pub(crate) fn unbound() -> Self {
        Self::default()
    }

    pub(crate) fn is_current(&self) -> bool {
        *self.id.lock().unwrap_or_else(PoisonError::into_inner) == Some(thread::current().id())
    }

    /// Bind to the calling thread. Returns `true` if the binding changed.
    pub(crate) fn rebind(&self) -> bool {
        let me = thread::current();
        let mut id = self.id.lock().unwrap_or_else(PoisonError::into_inner);
        if *id == Some(me.id()) {
            return false;
        }
        tracing::debug!(from = ?*id, to = ?me.id(), name = ?me.name(), "Dispatch thread changed");
        *id = Some(me.id());
        true
    }
}
