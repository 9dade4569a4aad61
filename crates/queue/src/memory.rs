//! In-process toolkit queue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use switchyard_events::{Event, EventKind};

use crate::error::{QueueError, Result};
use crate::ToolkitQueue;

/// Callback standing in for the toolkit's component tree during delivery.
pub type DeliveryHandler = Arc<dyn Fn(&mut Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct State {
    queue: VecDeque<Event>,
    closed: bool,
}

/// A FIFO toolkit queue held in memory.
///
/// Delivery records a snapshot of each event as it arrives, calls the
/// optional [`DeliveryHandler`], then performs the toolkit's own work for
/// synthetic payloads: invocations run their task and sequenced events are
/// disposed.
#[derive(Default)]
pub struct InMemoryToolkit {
    state: Mutex<State>,
    available: Condvar,
    delivered: Mutex<Vec<Event>>,
    handler: Mutex<Option<DeliveryHandler>>,
}

impl InMemoryToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(
        handler: impl Fn(&mut Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        let toolkit = Self::new();
        toolkit.set_handler(handler);
        toolkit
    }

    /// Replace the delivery handler.
    pub fn set_handler(
        &self,
        handler: impl Fn(&mut Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Events delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<Event> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn delivered_ids(&self) -> Vec<switchyard_events::EventId> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Event::id)
            .collect()
    }

    pub fn clear_delivered(&self) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl ToolkitQueue for InMemoryToolkit {
    fn pull_next(&self) -> Option<Event> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some(event);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn peek(&self) -> Option<Event> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .front()
            .cloned()
    }

    fn post(&self, event: Event) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            tracing::debug!(event = %event.id(), "Toolkit queue closed, rejecting event");
            return Err(QueueError::Closed);
        }
        state.queue.push_back(event);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn any_pending(&self, predicate: &dyn Fn(&Event) -> bool) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .iter()
            .any(predicate)
    }

    fn deliver(&self, event: &mut Event) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());

        // Cloned out so a handler that re-enters the dispatcher can deliver again.
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let result = match handler {
            Some(handler) => handler(event),
            None => Ok(()),
        };

        match event.kind() {
            EventKind::Invocation(invocation) => {
                invocation.run();
            }
            EventKind::Sequenced(sequenced) => sequenced.dispose(),
            _ => {}
        }
        result
    }

    fn close(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.available.notify_all();
    }
}
