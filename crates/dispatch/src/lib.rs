//! Central event dispatch core.
//!
//! [`Dispatcher`] pulls events from a [`ToolkitQueue`](switchyard_queue::ToolkitQueue)
//! and delivers them one at a time on a single thread. Around the toolkit's
//! default delivery it layers:
//!
//! - input normalization (layout fixes, extended mouse buttons, meta latch)
//! - pre and post dispatch interceptor chains
//! - key and mouse shortcut routing with mouse sequence blocking
//! - idle and activity listeners
//! - focus-aware deferral of continuations
//! - the application intent lock, classified per event
//!
//! Failures in any handler are caught at the narrowest boundary, reported to
//! a [`ReportSink`] and never stop the loop.
//!
//! ```
//! use std::sync::Arc;
//!
//! use switchyard_dispatch::{DispatchConfig, Dispatcher};
//! use switchyard_events::{Event, KeyEvent, SourceId};
//! use switchyard_idle::ManualScheduler;
//! use switchyard_queue::InMemoryToolkit;
//!
//! let toolkit = Arc::new(InMemoryToolkit::new());
//! let dispatcher = Dispatcher::builder(toolkit.clone())
//!     .config(DispatchConfig::headless())
//!     .scheduler(Arc::new(ManualScheduler::new()))
//!     .build();
//!
//! dispatcher
//!     .post_event(Event::key(SourceId::new(1), KeyEvent::typed('x')))
//!     .unwrap();
//! dispatcher.flush_queue().unwrap();
//!
//! assert_eq!(toolkit.delivered().len(), 1);
//! assert_eq!(dispatcher.key_event_counts(), (1, 1));
//! ```

mod config;
mod dispatcher;
mod error;
mod focus_ledger;
mod global;
pub mod hooks;
mod interceptor;
mod layout;
mod lock_bridge;
mod mouse;
mod normalizer;
mod report;
mod sequenced;
mod thread;

pub use config::{
    ConfigError, DispatchConfig, DEFAULT_CLOCK_JUMP_THRESHOLD_MS, DEFAULT_DOUBLE_CLICK_DISTANCE,
    DEFAULT_DOUBLE_CLICK_INTERVAL_MS, DEFAULT_IDLE_TICK_MS, MAX_DOUBLE_CLICK_INTERVAL_MS,
    MAX_PERIOD_MS,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, PostHookId};
pub use error::{DispatchError, DispatchFailure, Result, Stage};
pub use focus_ledger::LedgerEntry;
pub use global::{initialize, instance};
pub use hooks::{
    KeyDispatcher, KeyDispatcherRef, MouseDispatcher, MouseDispatcherRef, PlatformQuirks,
    PlatformQuirksRef, PostEventHook,
};
pub use interceptor::{Interceptor, InterceptorId};
pub use layout::default_layout_code;
pub use lock_bridge::{LockBridge, LockMode, LockPolicy};
pub use mouse::BlockMode;
pub use normalizer::InputNormalizer;
pub use report::{InMemoryReportSink, ReportSink, ReportSinkRef, TracingReportSink};
