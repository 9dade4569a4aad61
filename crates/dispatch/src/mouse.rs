//! Mouse sequence blocking and multi-click correction.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use switchyard_events::{Event, MouseEvent, MousePhase, SourceId};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};

/// How much of a blocked mouse sequence is suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMode {
    /// Later events of the sequence are consumed without delivery.
    Complete,
    /// Only the mouse shortcut dispatcher is skipped.
    ActionsOnly,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    source: SourceId,
    mode: BlockMode,
}

#[derive(Debug, Clone, Copy)]
struct Press {
    button: u16,
    x: i32,
    y: i32,
    at: Instant,
}

#[derive(Default)]
struct MouseState {
    block: Option<Block>,
    last_press: Option<Press>,
    /// Whether the latest press could legitimately continue a multi-click.
    multi_click_allowed: bool,
}

pub(crate) struct MouseRouter {
    state: Mutex<MouseState>,
    interval: Duration,
    distance: u32,
}

impl MouseRouter {
    pub(crate) fn new(config: &DispatchConfig) -> Self {
        Self {
            state: Mutex::new(MouseState::default()),
            interval: config.double_click_interval(),
            distance: config.double_click_distance,
        }
    }

    fn state(&self) -> MutexGuard<'_, MouseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn block(&self, seed: &Event, mode: BlockMode) -> Result<()> {
        if seed.as_mouse().is_none() {
            return Err(DispatchError::NotAMouseEvent(seed.id()));
        }
        tracing::debug!(source = %seed.source(), ?mode, "Blocking mouse sequence");
        self.state().block = Some(Block {
            source: seed.source(),
            mode,
        });
        Ok(())
    }

    /// Update press tracking for `event` and report whether it is blocked.
    ///
    /// A new press from the blocked source ends the block.
    pub(crate) fn observe(&self, event: &Event) -> Option<BlockMode> {
        let mouse = event.as_mouse()?;
        let mut state = self.state();

        if mouse.phase == MousePhase::Pressed {
            let press = Press {
                button: mouse.button,
                x: mouse.x,
                y: mouse.y,
                at: event.at(),
            };
            state.multi_click_allowed = state
                .last_press
                .is_some_and(|last| self.continues_multi_click(&last, &press));
            state.last_press = Some(press);
            if state.block.is_some_and(|b| b.source == event.source()) {
                state.block = None;
            }
            return None;
        }

        match state.block {
            Some(block)
                if block.source == event.source()
                    && matches!(
                        mouse.phase,
                        MousePhase::Released | MousePhase::Clicked | MousePhase::Dragged
                    ) =>
            {
                Some(block.mode)
            }
            _ => None,
        }
    }

    fn continues_multi_click(&self, last: &Press, press: &Press) -> bool {
        last.button == press.button
            && last.x.abs_diff(press.x) <= self.distance
            && last.y.abs_diff(press.y) <= self.distance
            && press.at.saturating_duration_since(last.at) <= self.interval
    }

    /// A single-click copy of `mouse` when its click count was miscomputed.
    pub(crate) fn corrected_click(&self, mouse: &MouseEvent) -> Option<MouseEvent> {
        if mouse.phase != MousePhase::Clicked || mouse.click_count <= 1 {
            return None;
        }
        if self.state().multi_click_allowed {
            return None;
        }
        Some(MouseEvent {
            click_count: 1,
            ..mouse.clone()
        })
    }
}
