//! Input normalization applied before routing.
//!
//! Three steps run in order, each returning the original event or a
//! replacement that feeds the next step:
//!
//! 1. keyboard-layout correction,
//! 2. extended mouse-button remapping,
//! 3. META emulation from a designated key.

use std::sync::atomic::{AtomicBool, Ordering};

use switchyard_events::{
    Event, EventKind, KeyCode, KeyEvent, KeyPhase, Modifiers, MouseEvent, WheelEvent,
};

use crate::config::DispatchConfig;
use crate::layout::default_layout_code;

pub struct InputNormalizer {
    fix_keyboard_layout: bool,
    raw_extended_mouse_buttons: bool,
    meta_key: Option<KeyCode>,
    meta_latched: AtomicBool,
}

impl InputNormalizer {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            fix_keyboard_layout: config.fix_keyboard_layout,
            raw_extended_mouse_buttons: config.raw_extended_mouse_buttons,
            meta_key: config.meta_emulation_key,
            meta_latched: AtomicBool::new(false),
        }
    }

    /// Run all steps. `app_active` is the application activation state
    /// before this event.
    pub fn normalize(&self, event: Event, app_active: bool) -> Event {
        let event = self.fix_layout(event);
        let event = self.remap_extended_buttons(event);
        self.emulate_meta(event, app_active)
    }

    pub fn is_meta_latched(&self) -> bool {
        self.meta_latched.load(Ordering::SeqCst)
    }

    fn fix_layout(&self, event: Event) -> Event {
        if !self.fix_keyboard_layout {
            return event;
        }
        let fixed = event.as_key().and_then(|key| {
            if key.phase == KeyPhase::Typed {
                return None;
            }
            let code = default_layout_code(key.ch?)?;
            (code != key.code).then(|| KeyEvent {
                code,
                ..key.clone()
            })
        });
        match fixed {
            Some(key) => {
                tracing::trace!(
                    event = %event.id(),
                    code = key.code.0,
                    "Key code fixed for default layout"
                );
                event.rewrite(EventKind::Key(key))
            }
            None => event,
        }
    }

    fn remap_extended_buttons(&self, event: Event) -> Event {
        if !self.raw_extended_mouse_buttons {
            return event;
        }
        let replacement = match event.as_mouse() {
            Some(mouse) if mouse.button == 4 || mouse.button == 5 => {
                Some(EventKind::Wheel(WheelEvent {
                    x: mouse.x,
                    y: mouse.y,
                    modifiers: mouse.legacy_modifiers | Modifiers::SHIFT,
                    click_count: mouse.click_count,
                    rotation: if mouse.button == 4 { -1 } else { 1 },
                    horizontal: true,
                }))
            }
            Some(mouse) if mouse.button == 6 || mouse.button == 7 => {
                let button = mouse.button - 2;
                Some(EventKind::Mouse(MouseEvent {
                    button,
                    click_count: 1,
                    legacy_modifiers: mouse.legacy_modifiers | Modifiers::button_down(button),
                    ..mouse.clone()
                }))
            }
            _ => None,
        };
        match replacement {
            Some(kind) => event.rewrite(kind),
            None => event,
        }
    }

    fn emulate_meta(&self, event: Event, app_active: bool) -> Event {
        let Some(meta_key) = self.meta_key else {
            return event;
        };

        if self.is_meta_latched() {
            let focus_left_app = event.as_focus().is_some_and(|f| f.opposite.is_none());
            if !app_active || focus_left_app {
                self.meta_latched.store(false, Ordering::SeqCst);
                return event;
            }
        }

        let (is_meta_key, phase) = match event.as_key() {
            Some(key) => (key.code == meta_key, Some(key.phase)),
            None => (false, None),
        };
        if is_meta_key {
            match phase {
                Some(KeyPhase::Pressed) => self.meta_latched.store(true, Ordering::SeqCst),
                Some(KeyPhase::Released) => self.meta_latched.store(false, Ordering::SeqCst),
                _ => {}
            }
            return event;
        }
        if !self.is_meta_latched() {
            return event;
        }

        let patched = match event.kind() {
            EventKind::Key(key) => Some(EventKind::Key(KeyEvent {
                modifiers: key.modifiers | Modifiers::META,
                ..key.clone()
            })),
            EventKind::Mouse(mouse) if mouse.button != 0 => Some(EventKind::Mouse(MouseEvent {
                modifiers: mouse.modifiers | Modifiers::META,
                legacy_modifiers: mouse.legacy_modifiers | Modifiers::META,
                ..mouse.clone()
            })),
            _ => None,
        };
        match patched {
            Some(kind) => event.rewrite(kind),
            None => event,
        }
    }
}
