//! Ledger of in-flight focus transitions.
//!
//! Focus events are recorded when posted and resolved when dispatched.
//! Continuations that must not observe a half-finished focus transfer are
//! parked on the most recent outstanding focus-gained entry and run when
//! that entry drains.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use switchyard_events::{Event, EventClass, EventId, Task};
use tokio_util::sync::CancellationToken;

pub(crate) struct Continuation {
    pub(crate) task: Task,
    /// Skipped if cancelled by the time the owning entry drains.
    pub(crate) expiry: Option<CancellationToken>,
}

impl Continuation {
    pub(crate) fn is_expired(&self) -> bool {
        self.expiry
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

struct Entry {
    event: EventId,
    focus_gained: bool,
    continuations: Vec<Continuation>,
}

/// Diagnostic view of one outstanding ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub event: EventId,
    pub focus_gained: bool,
    pub continuations: usize,
}

#[derive(Default)]
pub(crate) struct FocusLedger {
    entries: Mutex<VecDeque<Entry>>,
}

impl FocusLedger {
    fn entries(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a posted focus transition. Other events are ignored.
    pub(crate) fn record(&self, event: &Event) {
        let class = event.class();
        if !class.contains(EventClass::FOCUS_TRANSITION) {
            return;
        }
        self.entries().push_back(Entry {
            event: event.id(),
            focus_gained: class.contains(EventClass::FOCUS_GAINED),
            continuations: Vec::new(),
        });
    }

    /// Drop the entry for an event that never made it into the queue.
    pub(crate) fn forget(&self, event: EventId) {
        self.entries().retain(|entry| entry.event != event);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Park `continuation` on the most recent focus-gained entry.
    ///
    /// Hands it back when there is no such entry; the caller runs it now.
    pub(crate) fn attach(&self, continuation: Continuation) -> Option<Continuation> {
        let mut entries = self.entries();
        match entries.iter_mut().rev().find(|entry| entry.focus_gained) {
            Some(entry) => {
                tracing::trace!(event = %entry.event, "Continuation parked on focus entry");
                entry.continuations.push(continuation);
                None
            }
            None => Some(continuation),
        }
    }

    /// Drain entries up to and including `event`, or every entry when
    /// `event` was never recorded. Returns their continuations in order.
    pub(crate) fn drain_through(&self, event: EventId) -> Vec<Continuation> {
        let mut entries = self.entries();
        let count = match entries.iter().position(|entry| entry.event == event) {
            Some(index) => index + 1,
            None => entries.len(),
        };
        entries
            .drain(..count)
            .flat_map(|entry| entry.continuations)
            .collect()
    }

    pub(crate) fn state(&self) -> Vec<LedgerEntry> {
        self.entries()
            .iter()
            .map(|entry| LedgerEntry {
                event: entry.event,
                focus_gained: entry.focus_gained,
                continuations: entry.continuations.len(),
            })
            .collect()
    }
}
