//! Synthetic invocation payloads and sequenced (paired) events.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// A one-shot unit of work handed to the dispatch thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Payload type tag of a synthetic invocation.
///
/// The lock bridge keys its allow/deny decisions on this tag, so the set of
/// tags is open: toolkits and plugins may introduce their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationTag(Cow<'static, str>);

impl InvocationTag {
    /// Toolkit repaint processing.
    pub const REPAINT: InvocationTag = InvocationTag(Cow::Borrowed("repaint"));
    /// Flush of deferred "invoke later" work that must run with the intent lock.
    pub const FLUSH_NOW: InvocationTag = InvocationTag(Cow::Borrowed("flush-now"));
    /// Generic deferred task posted by the core itself.
    pub const LATER: InvocationTag = InvocationTag(Cow::Borrowed("later"));

    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A synthetic invocation: a tagged task that the toolkit runs when the
/// event reaches default delivery.
///
/// Clones share the task, and the task runs at most once across all of them.
#[derive(Clone)]
pub struct Invocation {
    tag: InvocationTag,
    task: Arc<Mutex<Option<Task>>>,
}

impl Invocation {
    pub fn new(tag: InvocationTag, task: impl FnOnce() + Send + 'static) -> Self {
        Self {
            tag,
            task: Arc::new(Mutex::new(Some(Box::new(task)))),
        }
    }

    pub fn tag(&self) -> &InvocationTag {
        &self.tag
    }

    /// Run the task if nobody has run it yet.
    ///
    /// Returns `false` when the task was already taken.
    pub fn run(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    pub fn has_run(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("tag", &self.tag)
            .field("has_run", &self.has_run())
            .finish()
    }
}

struct SequencedInner {
    disposed: AtomicBool,
    disposer: Mutex<Option<Task>>,
}

/// A toolkit event paired with an internal disposal callback.
///
/// Disposal may itself pump the event queue, which is why the dispatcher
/// tracks the outstanding sequenced event and disposes it before starting on
/// the next one.
#[derive(Clone)]
pub struct Sequenced {
    inner: Arc<SequencedInner>,
}

impl Sequenced {
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(SequencedInner {
                disposed: AtomicBool::new(false),
                disposer: Mutex::new(Some(Box::new(disposer))),
            }),
        }
    }

    /// Run the disposal callback once. Later calls are no-ops.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let disposer = self
            .inner
            .disposer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(disposer) = disposer {
            disposer();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Sequenced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequenced")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
