//! Read/write-intent lock boundary.
//!
//! The dispatch core wraps event delivery in [`IntentLock::run_under_write_intent`]
//! and parks on the toolkit queue inside [`IntentLock::run_unlocking`], so other
//! threads can take the lock while the dispatch thread waits for input.

mod process;
mod recording;

use std::sync::Arc;

pub use process::ProcessIntentLock;
pub use recording::{LockCall, RecordingLock};

/// Process-wide lock distinguishing shared reads from exclusive write intent.
pub trait IntentLock: Send + Sync {
    /// Run `task` holding write intent. Released when `task` returns or panics.
    fn run_under_write_intent(&self, task: &mut dyn FnMut());

    /// Run `task` with the calling thread's write-intent hold released,
    /// restoring it afterwards.
    fn run_unlocking(&self, task: &mut dyn FnMut());
}

/// Shared handle to the installed lock manager.
pub type IntentLockRef = Arc<dyn IntentLock>;
