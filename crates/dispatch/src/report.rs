//! Failure reporting and handler isolation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use switchyard_events::EventId;

use crate::error::{DispatchFailure, Stage};

/// Receives handler failures. The dispatch loop never stops for them.
pub trait ReportSink: Send + Sync {
    fn report(&self, failure: DispatchFailure);
}

pub type ReportSinkRef = Arc<dyn ReportSink>;

/// Logs failures with `tracing::error!`.
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn report(&self, failure: DispatchFailure) {
        tracing::error!(
            stage = %failure.stage,
            event = ?failure.event,
            "Handler failed: {}",
            failure.cause
        );
    }
}

/// Collects failures in memory for inspection.
#[derive(Default)]
pub struct InMemoryReportSink {
    failures: Mutex<Vec<DispatchFailure>>,
}

impl InMemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<DispatchFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.failures().iter().map(|f| f.stage).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl ReportSink for InMemoryReportSink {
    fn report(&self, failure: DispatchFailure) {
        tracing::debug!(%failure, "Recorded handler failure");
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Run `f`, turning an `Err` or a panic into a report.
///
/// Returns `None` when `f` failed.
pub(crate) fn isolate<R>(
    sink: &dyn ReportSink,
    stage: Stage,
    event: Option<EventId>,
    f: impl FnOnce() -> anyhow::Result<R>,
) -> Option<R> {
    let cause = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(e)) => format!("{e:#}"),
        Err(payload) => panic_message(payload.as_ref()),
    };
    sink.report(DispatchFailure {
        stage,
        event,
        cause,
    });
    None
}
