//! Toolkit event queue boundary.
//!
//! The dispatch core is the sole reader of one [`ToolkitQueue`]. Producers on
//! any thread post into it; the dispatch thread pulls, and hands each event
//! back to the toolkit for default delivery once interceptors and routing
//! have had their turn.
//!
//! [`InMemoryToolkit`] is a complete in-process implementation, used by
//! tests, headless harnesses and the replay demo.

mod error;
mod memory;

use std::sync::Arc;

use switchyard_events::Event;

pub use error::{QueueError, Result};
pub use memory::{DeliveryHandler, InMemoryToolkit};

/// The toolkit's native event source and default delivery path.
pub trait ToolkitQueue: Send + Sync {
    /// Block until the next event is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    fn pull_next(&self) -> Option<Event>;

    /// Look at the head of the queue without removing it.
    fn peek(&self) -> Option<Event>;

    /// Append an event to the tail of the queue.
    fn post(&self, event: Event) -> Result<()>;

    /// Whether any queued event matches `predicate`.
    fn any_pending(&self, predicate: &dyn Fn(&Event) -> bool) -> bool;

    /// The toolkit's default delivery of `event` to its target.
    fn deliver(&self, event: &mut Event) -> anyhow::Result<()>;

    /// Stop accepting events and wake a blocked [`pull_next`](Self::pull_next).
    fn close(&self);
}

/// Shared handle to the toolkit queue.
pub type ToolkitRef = Arc<dyn ToolkitQueue>;
