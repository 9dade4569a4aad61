//! Pluggable collaborators consulted during routing.

use std::sync::Arc;

use switchyard_events::Event;

/// Keyboard shortcut dispatcher.
pub trait KeyDispatcher: Send + Sync {
    /// Returns `true` when the key event triggered a shortcut. The event is
    /// then marked consumed but still reaches the toolkit.
    fn dispatch_key(&self, event: &mut Event) -> bool;

    /// `false` while in the middle of a multi-stroke shortcut.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Mouse shortcut dispatcher.
pub trait MouseDispatcher: Send + Sync {
    /// Returns `true` when the event was handled and must not reach the
    /// toolkit's default delivery.
    fn dispatch_mouse(&self, event: &mut Event) -> bool;
}

/// Per-platform adjustments applied after input normalization.
pub trait PlatformQuirks: Send + Sync {
    fn adjust(&self, event: Event) -> Event {
        event
    }
}

/// Sees every event posted through the dispatcher before it is queued.
pub trait PostEventHook: Send + Sync {
    /// Returns `true` to swallow the event; it is then never queued.
    fn on_post(&self, event: &Event) -> bool;
}

impl<F> PostEventHook for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn on_post(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Declines every key event.
pub struct NoopKeyDispatcher;

impl KeyDispatcher for NoopKeyDispatcher {
    fn dispatch_key(&self, _event: &mut Event) -> bool {
        false
    }
}

/// Declines every mouse event.
pub struct NoopMouseDispatcher;

impl MouseDispatcher for NoopMouseDispatcher {
    fn dispatch_mouse(&self, _event: &mut Event) -> bool {
        false
    }
}

pub struct NoQuirks;

impl PlatformQuirks for NoQuirks {}

pub type KeyDispatcherRef = Arc<dyn KeyDispatcher>;
pub type MouseDispatcherRef = Arc<dyn MouseDispatcher>;
pub type PlatformQuirksRef = Arc<dyn PlatformQuirks>;
