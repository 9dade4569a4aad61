//! Reentrancy guard for sequenced (paired) events.

use std::sync::{Mutex, PoisonError};

use switchyard_events::{Event, EventId, Sequenced};

/// Tracks at most one outstanding sequenced event.
#[derive(Default)]
pub(crate) struct SequencedGuard {
    outstanding: Mutex<Option<(EventId, Sequenced)>>,
}

impl SequencedGuard {
    /// Must run before anything else in a dispatch.
    ///
    /// The slot is already empty while the previous event is disposed;
    /// disposal may pump the queue and re-enter here.
    pub(crate) fn enter(&self, event: &Event) {
        let Some(sequenced) = event.as_sequenced() else {
            return;
        };
        let previous = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((previous_id, previous)) = previous {
            tracing::debug!(
                previous = %previous_id,
                next = %event.id(),
                "Disposing nested sequenced event"
            );
            previous.dispose();
        }
        *self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((event.id(), sequenced.clone()));
    }

    /// Forget `id` if it is still the outstanding event.
    pub(crate) fn leave(&self, id: EventId) {
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if outstanding.as_ref().is_some_and(|(current, _)| *current == id) {
            *outstanding = None;
        }
    }

    pub(crate) fn outstanding(&self) -> Option<EventId> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(id, _)| *id)
    }
}
