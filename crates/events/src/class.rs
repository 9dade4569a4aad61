//! One-time event classification.

use bitflags::bitflags;

use crate::event::{EventKind, FocusPhase, KeyPhase, MousePhase, WindowPhase};

bitflags! {
    /// Facts about an event that routing decisions depend on.
    ///
    /// Computed by [`EventClass::of`] when an [`Event`](crate::Event) is built
    /// and carried with it afterwards.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventClass: u32 {
        /// Key, mouse or wheel event coming from a user device.
        const USER_INPUT = 1 << 0;
        /// User input plus input-method, window and action events.
        const INPUT = 1 << 1;
        const KEYBOARD = 1 << 2;
        const MOUSE = 1 << 3;
        /// Focus gained/lost and window activation/focus changes.
        const FOCUS_TRANSITION = 1 << 4;
        const FOCUS_GAINED = 1 << 5;
        /// Key press/typed, mouse press/release/click.
        const QUALIFYING_INPUT = 1 << 6;
        /// Window, focus and user input events; resets idle timers.
        const ACTIVITY = 1 << 7;
        /// Events that open a user-visible transaction: input, item and focus.
        const TRANSACTION = 1 << 8;
        const INVOCATION = 1 << 9;
        const SEQUENCED = 1 << 10;
        const WINDOW = 1 << 11;
    }
}

impl EventClass {
    pub fn of(kind: &EventKind) -> EventClass {
        let mut class = EventClass::empty();
        match kind {
            EventKind::Key(key) => {
                class |= EventClass::USER_INPUT | EventClass::INPUT | EventClass::KEYBOARD;
                if matches!(key.phase, KeyPhase::Pressed | KeyPhase::Typed) {
                    class |= EventClass::QUALIFYING_INPUT;
                }
            }
            EventKind::Mouse(mouse) => {
                class |= EventClass::USER_INPUT | EventClass::INPUT | EventClass::MOUSE;
                if matches!(
                    mouse.phase,
                    MousePhase::Pressed | MousePhase::Released | MousePhase::Clicked
                ) {
                    class |= EventClass::QUALIFYING_INPUT;
                }
            }
            EventKind::Wheel(_) => {
                class |= EventClass::USER_INPUT | EventClass::INPUT | EventClass::MOUSE;
            }
            EventKind::InputMethod { .. } | EventKind::Action { .. } => {
                class |= EventClass::INPUT;
            }
            EventKind::Window(window) => {
                class |= EventClass::INPUT | EventClass::WINDOW;
                if matches!(
                    window.phase,
                    WindowPhase::Activated
                        | WindowPhase::Deactivated
                        | WindowPhase::GainedFocus
                        | WindowPhase::LostFocus
                ) {
                    class |= EventClass::FOCUS_TRANSITION;
                }
            }
            EventKind::Focus(focus) => {
                class |= EventClass::FOCUS_TRANSITION;
                if focus.phase == FocusPhase::Gained {
                    class |= EventClass::FOCUS_GAINED;
                }
            }
            EventKind::Item { .. } => {
                class |= EventClass::TRANSACTION;
            }
            EventKind::Invocation(_) => class |= EventClass::INVOCATION,
            EventKind::Sequenced(_) => class |= EventClass::SEQUENCED,
            EventKind::Component(_) | EventKind::Other(_) => {}
        }

        if class.intersects(EventClass::USER_INPUT | EventClass::WINDOW)
            || matches!(kind, EventKind::Focus(_))
        {
            class |= EventClass::ACTIVITY;
        }
        if class.intersects(EventClass::INPUT) || matches!(kind, EventKind::Focus(_)) {
            class |= EventClass::TRANSACTION;
        }
        class
    }
}
