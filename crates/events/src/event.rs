//! Toolkit events and their payloads.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::class::EventClass;
use crate::invocation::{Invocation, InvocationTag, Sequenced};
use crate::keys::{KeyCode, Modifiers};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    pub fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-owning handle to the component an event targets.
///
/// The dispatch core never dereferences a source; it only compares handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(u64);

impl SourceId {
    /// Source used for events synthesized by the dispatch core itself.
    pub const DISPATCHER: SourceId = SourceId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPhase {
    Pressed,
    Released,
    Typed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub phase: KeyPhase,
    pub code: KeyCode,
    pub ch: Option<char>,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(phase: KeyPhase, code: KeyCode, ch: Option<char>) -> Self {
        Self {
            phase,
            code,
            ch,
            modifiers: Modifiers::empty(),
        }
    }

    pub fn pressed(code: KeyCode, ch: Option<char>) -> Self {
        Self::new(KeyPhase::Pressed, code, ch)
    }

    pub fn released(code: KeyCode, ch: Option<char>) -> Self {
        Self::new(KeyPhase::Released, code, ch)
    }

    pub fn typed(ch: char) -> Self {
        Self::new(KeyPhase::Typed, KeyCode::UNDEFINED, Some(ch))
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MousePhase {
    Pressed,
    Released,
    Clicked,
    Moved,
    Dragged,
    Entered,
    Exited,
}

/// A mouse event.
///
/// `modifiers` is the extended (button-down aware) mask. `legacy_modifiers`
/// mirrors the older toolkit mask, which some platforms fill in while leaving
/// the extended one empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MouseEvent {
    pub phase: MousePhase,
    pub button: u16,
    pub x: i32,
    pub y: i32,
    pub click_count: u32,
    pub modifiers: Modifiers,
    pub legacy_modifiers: Modifiers,
    pub popup_trigger: bool,
}

impl MouseEvent {
    pub fn new(phase: MousePhase, button: u16, x: i32, y: i32) -> Self {
        Self {
            phase,
            button,
            x,
            y,
            click_count: 0,
            modifiers: Modifiers::empty(),
            legacy_modifiers: Modifiers::empty(),
            popup_trigger: false,
        }
    }

    pub fn pressed(button: u16, x: i32, y: i32) -> Self {
        Self {
            click_count: 1,
            modifiers: Modifiers::button_down(button),
            ..Self::new(MousePhase::Pressed, button, x, y)
        }
    }

    pub fn released(button: u16, x: i32, y: i32) -> Self {
        Self {
            click_count: 1,
            ..Self::new(MousePhase::Released, button, x, y)
        }
    }

    pub fn clicked(button: u16, x: i32, y: i32, click_count: u32) -> Self {
        Self {
            click_count,
            ..Self::new(MousePhase::Clicked, button, x, y)
        }
    }

    pub fn moved(x: i32, y: i32) -> Self {
        Self::new(MousePhase::Moved, 0, x, y)
    }

    pub fn with_click_count(mut self, click_count: u32) -> Self {
        self.click_count = click_count;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_legacy_modifiers(mut self, legacy_modifiers: Modifiers) -> Self {
        self.legacy_modifiers = legacy_modifiers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelEvent {
    pub x: i32,
    pub y: i32,
    pub modifiers: Modifiers,
    pub click_count: u32,
    /// Scroll amount in notches; negative scrolls up or left.
    pub rotation: i32,
    pub horizontal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusPhase {
    Gained,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    pub phase: FocusPhase,
    /// The component on the other side of the transfer, if known.
    pub opposite: Option<SourceId>,
}

impl FocusEvent {
    pub fn gained(opposite: Option<SourceId>) -> Self {
        Self {
            phase: FocusPhase::Gained,
            opposite,
        }
    }

    pub fn lost(opposite: Option<SourceId>) -> Self {
        Self {
            phase: FocusPhase::Lost,
            opposite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    Opened,
    Closing,
    Closed,
    Activated,
    Deactivated,
    GainedFocus,
    LostFocus,
    Iconified,
    Deiconified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub phase: WindowPhase,
    /// The window on the other side of an activation change. `None` when
    /// activation moves to another application.
    pub opposite: Option<SourceId>,
}

impl WindowEvent {
    pub fn new(phase: WindowPhase) -> Self {
        Self {
            phase,
            opposite: None,
        }
    }

    pub fn with_opposite(mut self, opposite: SourceId) -> Self {
        self.opposite = Some(opposite);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentPhase {
    Moved,
    Resized,
    Shown,
    Hidden,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Wheel(WheelEvent),
    Focus(FocusEvent),
    Window(WindowEvent),
    Component(ComponentPhase),
    Action { command: String },
    Item { selected: bool },
    InputMethod { committed: String },
    Invocation(Invocation),
    Sequenced(Sequenced),
    Other(String),
}

impl EventKind {
    /// Short lowercase name used in logs and test recordings.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Key(key) => match key.phase {
                KeyPhase::Pressed => "key_pressed",
                KeyPhase::Released => "key_released",
                KeyPhase::Typed => "key_typed",
            },
            EventKind::Mouse(mouse) => match mouse.phase {
                MousePhase::Pressed => "mouse_pressed",
                MousePhase::Released => "mouse_released",
                MousePhase::Clicked => "mouse_clicked",
                MousePhase::Moved => "mouse_moved",
                MousePhase::Dragged => "mouse_dragged",
                MousePhase::Entered => "mouse_entered",
                MousePhase::Exited => "mouse_exited",
            },
            EventKind::Wheel(_) => "mouse_wheel",
            EventKind::Focus(focus) => match focus.phase {
                FocusPhase::Gained => "focus_gained",
                FocusPhase::Lost => "focus_lost",
            },
            EventKind::Window(_) => "window",
            EventKind::Component(_) => "component",
            EventKind::Action { .. } => "action",
            EventKind::Item { .. } => "item",
            EventKind::InputMethod { .. } => "input_method",
            EventKind::Invocation(_) => "invocation",
            EventKind::Sequenced(_) => "sequenced",
            EventKind::Other(_) => "other",
        }
    }
}

/// An event travelling through the dispatch core.
///
/// The class is computed once at construction; [`Event::rewrite`] is the only
/// way to change the kind and recomputes it.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    source: SourceId,
    kind: EventKind,
    class: EventClass,
    when_ms: i64,
    at: Instant,
    consumed: bool,
}

impl Event {
    pub fn new(source: SourceId, kind: EventKind) -> Self {
        Self {
            id: EventId::next(),
            source,
            class: EventClass::of(&kind),
            kind,
            when_ms: chrono::Utc::now().timestamp_millis(),
            at: Instant::now(),
            consumed: false,
        }
    }

    pub fn key(source: SourceId, key: KeyEvent) -> Self {
        Self::new(source, EventKind::Key(key))
    }

    pub fn mouse(source: SourceId, mouse: MouseEvent) -> Self {
        Self::new(source, EventKind::Mouse(mouse))
    }

    pub fn focus(source: SourceId, focus: FocusEvent) -> Self {
        Self::new(source, EventKind::Focus(focus))
    }

    pub fn window(source: SourceId, window: WindowEvent) -> Self {
        Self::new(source, EventKind::Window(window))
    }

    pub fn invocation(
        source: SourceId,
        tag: InvocationTag,
        task: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self::new(source, EventKind::Invocation(Invocation::new(tag, task)))
    }

    pub fn sequenced(source: SourceId, disposer: impl FnOnce() + Send + 'static) -> Self {
        Self::new(source, EventKind::Sequenced(Sequenced::new(disposer)))
    }

    /// Override the monotonic instant (replays and tests).
    pub fn with_instant(mut self, at: Instant) -> Self {
        self.at = at;
        self
    }

    /// Override the wall-clock timestamp in milliseconds.
    pub fn with_timestamp(mut self, when_ms: i64) -> Self {
        self.when_ms = when_ms;
        self
    }

    /// Replace the payload, keeping identity, source and timestamps.
    pub fn rewrite(mut self, kind: EventKind) -> Self {
        self.class = EventClass::of(&kind);
        self.kind = kind;
        self
    }

    /// A fresh event with a new id carrying the same source and timestamps.
    pub fn derive(&self, kind: EventKind) -> Self {
        Self {
            id: EventId::next(),
            source: self.source,
            class: EventClass::of(&kind),
            kind,
            when_ms: self.when_ms,
            at: self.at,
            consumed: false,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn class(&self) -> EventClass {
        self.class
    }

    pub fn when_ms(&self) -> i64 {
        self.when_ms
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn consume(&mut self) {
        self.consumed = true;
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn as_key(&self) -> Option<&KeyEvent> {
        match &self.kind {
            EventKind::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_mouse(&self) -> Option<&MouseEvent> {
        match &self.kind {
            EventKind::Mouse(mouse) => Some(mouse),
            _ => None,
        }
    }

    pub fn as_focus(&self) -> Option<&FocusEvent> {
        match &self.kind {
            EventKind::Focus(focus) => Some(focus),
            _ => None,
        }
    }

    pub fn as_sequenced(&self) -> Option<&Sequenced> {
        match &self.kind {
            EventKind::Sequenced(sequenced) => Some(sequenced),
            _ => None,
        }
    }

    pub fn as_invocation(&self) -> Option<&Invocation> {
        match &self.kind {
            EventKind::Invocation(invocation) => Some(invocation),
            _ => None,
        }
    }
}
