//! Dispatcher configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_events::{InvocationTag, KeyCode};
use thiserror::Error;

/// Default idle-time telemetry tick (20s).
pub const DEFAULT_IDLE_TICK_MS: u64 = 20_000;

/// Default maximum gap between presses of one multi-click.
pub const DEFAULT_DOUBLE_CLICK_INTERVAL_MS: u64 = 500;

/// Default maximum distance, per axis, between presses of one multi-click.
pub const DEFAULT_DOUBLE_CLICK_DISTANCE: u32 = 4;

/// A wall clock moving back by more than this is reported as a time jump.
pub const DEFAULT_CLOCK_JUMP_THRESHOLD_MS: i64 = 1_000;

/// Upper bound for the idle tick and the clock-jump threshold (24h).
pub const MAX_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;

/// Upper bound for the multi-click interval.
pub const MAX_DOUBLE_CLICK_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Configuration for the dispatcher and its input normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Rewrite key codes produced under non-default keyboard layouts to the
    /// code the default (US) layout assigns to the typed character.
    pub fix_keyboard_layout: bool,
    /// The platform reports extra mouse buttons as raw indices 4 to 7.
    pub raw_extended_mouse_buttons: bool,
    /// Key whose press latches the META modifier. `None` disables emulation.
    pub meta_emulation_key: Option<KeyCode>,
    /// Invocation tags delivered without write intent.
    pub unlocked_invocations: Vec<InvocationTag>,
    /// Invocation tags that always take write intent. Checked first.
    pub locked_invocations: Vec<InvocationTag>,
    pub idle_tick_ms: u64,
    /// Skip background telemetry (tests, headless tools).
    pub headless: bool,
    pub double_click_interval_ms: u64,
    pub double_click_distance: u32,
    pub clock_jump_threshold_ms: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fix_keyboard_layout: false,
            raw_extended_mouse_buttons: false,
            meta_emulation_key: Some(KeyCode::WINDOWS),
            unlocked_invocations: vec![InvocationTag::REPAINT],
            locked_invocations: vec![InvocationTag::FLUSH_NOW],
            idle_tick_ms: DEFAULT_IDLE_TICK_MS,
            headless: false,
            double_click_interval_ms: DEFAULT_DOUBLE_CLICK_INTERVAL_MS,
            double_click_distance: DEFAULT_DOUBLE_CLICK_DISTANCE,
            clock_jump_threshold_ms: DEFAULT_CLOCK_JUMP_THRESHOLD_MS,
        }
    }
}

impl DispatchConfig {
    /// Configuration for tests and headless harnesses.
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&json)
    }

    /// Reject values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("idle_tick_ms", self.idle_tick_ms, MAX_PERIOD_MS)?;
        check_range(
            "double_click_interval_ms",
            self.double_click_interval_ms,
            MAX_DOUBLE_CLICK_INTERVAL_MS,
        )?;
        let threshold = u64::try_from(self.clock_jump_threshold_ms).unwrap_or(0);
        if threshold == 0 || threshold > MAX_PERIOD_MS {
            return Err(ConfigError::InvalidValue {
                field: "clock_jump_threshold_ms",
                message: format!(
                    "must be between 1 and {}, got {}",
                    MAX_PERIOD_MS, self.clock_jump_threshold_ms
                ),
            });
        }
        for tag in &self.unlocked_invocations {
            if self.locked_invocations.contains(tag) {
                tracing::warn!(%tag, "Invocation tag is both locked and unlocked; locked wins");
            }
        }
        Ok(())
    }

    /// Telemetry tick as a [`Duration`].
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    /// Multi-click window as a [`Duration`].
    pub fn double_click_interval(&self) -> Duration {
        Duration::from_millis(self.double_click_interval_ms)
    }
}

fn check_range(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::InvalidValue {
            field,
            message: format!("must be between 1 and {max}, got {value}"),
        });
    }
    Ok(())
}
