//! Owner lifetimes for scoped registrations.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::invocation::Task;

static NEXT_LIFETIME_ID: AtomicU64 = AtomicU64::new(1);

struct LifetimeInner {
    id: u64,
    disposed: AtomicBool,
    cleanups: Mutex<Vec<Task>>,
}

impl LifetimeInner {
    fn run_cleanups(&self) {
        let cleanups = std::mem::take(
            &mut *self.cleanups.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
    }
}

impl Drop for LifetimeInner {
    fn drop(&mut self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.run_cleanups();
        }
    }
}

/// An owner token. Registrations tied to a lifetime are removed when it is
/// disposed, or when the last handle is dropped.
///
/// Cleanups run once, most recently registered first.
#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<LifetimeInner>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LifetimeInner {
                id: NEXT_LIFETIME_ID.fetch_add(1, Ordering::Relaxed),
                disposed: AtomicBool::new(false),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a cleanup. Runs immediately if the lifetime is already
    /// disposed.
    pub fn on_dispose(&self, cleanup: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            cleanup();
            return;
        }
        let mut cleanups = self
            .inner
            .cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Re-check under the lock: dispose() may have drained the list meanwhile.
        if self.inner.disposed.load(Ordering::SeqCst) {
            drop(cleanups);
            cleanup();
            return;
        }
        cleanups.push(Box::new(cleanup));
    }

    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::trace!(lifetime = self.inner.id, "Disposing lifetime");
        self.inner.run_cleanups();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
