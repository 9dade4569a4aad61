//! Shared event model for the switchyard dispatch core.
//!
//! This crate defines the values that flow through the dispatch loop:
//! toolkit events, their one-time classification, synthetic invocations,
//! sequenced (paired) events and the owner [`Lifetime`] used to scope
//! registrations.
//!
//! # Classification
//!
//! Every [`Event`] carries an [`EventClass`] computed once when the event is
//! built. Routing code asks the class ("is this a focus transition?",
//! "does this count as user activity?") instead of re-matching on the kind
//! at each step.
//!
//! ```
//! use switchyard_events::{Event, EventClass, KeyCode, KeyEvent, SourceId};
//!
//! let event = Event::key(SourceId::new(7), KeyEvent::pressed(KeyCode::A, Some('a')));
//! assert!(event.class().contains(EventClass::KEYBOARD));
//! assert!(event.class().contains(EventClass::QUALIFYING_INPUT));
//! ```

mod class;
mod event;
mod invocation;
mod keys;
mod lifetime;

pub use class::EventClass;
pub use event::{
    ComponentPhase, Event, EventId, EventKind, FocusEvent, FocusPhase, KeyEvent, KeyPhase,
    MouseEvent, MousePhase, SourceId, WheelEvent, WindowEvent, WindowPhase,
};
pub use invocation::{Invocation, InvocationTag, Sequenced, Task};
pub use keys::{KeyCode, Modifiers};
pub use lifetime::Lifetime;
