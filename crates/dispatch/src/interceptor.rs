//! Pre- and post-dispatch interceptor chains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use switchyard_events::{Event, Lifetime};

use crate::error::Stage;
use crate::report::{isolate, ReportSink};

static NEXT_INTERCEPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// A handler offered each event before or after normal routing.
pub trait Interceptor: Send + Sync {
    /// Returns `true` when the event was fully handled. Only the pre-dispatch
    /// chain acts on the answer.
    fn try_dispatch(&self, event: &mut Event) -> bool;
}

impl<F> Interceptor for F
where
    F: Fn(&mut Event) -> bool + Send + Sync,
{
    fn try_dispatch(&self, event: &mut Event) -> bool {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(u64);

type Entries = Vec<(InterceptorId, Arc<dyn Interceptor>)>;

/// An ordered interceptor list.
///
/// Iteration works on a snapshot, so handlers may register or remove
/// interceptors while an event is being delivered; the change applies from
/// the next event.
#[derive(Clone)]
pub(crate) struct InterceptorChain {
    stage: Stage,
    entries: Arc<Mutex<Entries>>,
}

impl InterceptorChain {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            stage,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(
        &self,
        interceptor: Arc<dyn Interceptor>,
        owner: Option<&Lifetime>,
    ) -> InterceptorId {
        let id = InterceptorId(NEXT_INTERCEPTOR_ID.fetch_add(1, Ordering::Relaxed));
        self.entries().push((id, interceptor));
        if let Some(owner) = owner {
            let weak = Arc::downgrade(&self.entries);
            owner.on_dispose(move || {
                if let Some(entries) = weak.upgrade() {
                    entries
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(entry, _)| *entry != id);
                }
            });
        }
        tracing::debug!(stage = %self.stage, ?id, "Interceptor added");
        id
    }

    pub(crate) fn remove(&self, id: InterceptorId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Interceptor>> {
        self.entries()
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect()
    }

    /// Offer `event` to each interceptor until one consumes it.
    ///
    /// A failing interceptor is reported and counts as "not consumed".
    pub(crate) fn run_until_consumed(&self, event: &mut Event, sink: &dyn ReportSink) -> bool {
        let id = event.id();
        for interceptor in self.snapshot() {
            let consumed = isolate(sink, self.stage, Some(id), || {
                Ok(interceptor.try_dispatch(event))
            });
            if consumed == Some(true) {
                tracing::trace!(event = %id, stage = %self.stage, "Event consumed by interceptor");
                return true;
            }
        }
        false
    }

    /// Offer `event` to every interceptor, each in isolation.
    pub(crate) fn run_all(&self, event: &mut Event, sink: &dyn ReportSink) {
        let id = event.id();
        for interceptor in self.snapshot() {
            isolate(sink, self.stage, Some(id), || {
                interceptor.try_dispatch(event);
                Ok(())
            });
        }
    }
}
