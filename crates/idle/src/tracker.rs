//! Idle and activity listener tables.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use switchyard_events::{Event, EventClass, Lifetime};

use crate::error::IdleError;
use crate::scheduler::{SchedulerRef, TimerId};

/// Period of the idle-time telemetry tick.
pub const DEFAULT_IDLE_TICK: Duration = Duration::from_secs(20);

/// Idle timeouts must be strictly shorter than this.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub type IdleCallback = Arc<dyn Fn() + Send + Sync + 'static>;
pub type ActivityCallback = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdleListenerId(u64);

impl fmt::Display for IdleListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idle:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityListenerId(u64);

/// Configuration for the idle tracker.
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Period of the idle-time telemetry tick.
    pub tick: Duration,
    /// Headless and test runs skip the telemetry tick entirely.
    pub headless: bool,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_IDLE_TICK,
            headless: false,
        }
    }
}

struct IdleListener {
    callback: IdleCallback,
    timeout: Duration,
    generation: u64,
    pending: Option<TimerId>,
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    idle: BTreeMap<IdleListenerId, IdleListener>,
    activity: BTreeMap<ActivityListenerId, ActivityCallback>,
    tick: Option<TimerId>,
    last_active: Option<Instant>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Inner {
    scheduler: SchedulerRef,
    config: IdleConfig,
    tables: Mutex<Tables>,
    idle_ms: AtomicU64,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks user inactivity and fans out idle and activity notifications.
///
/// Listener tables live behind one mutex that is never held while a callback
/// runs. Idle callbacks run wherever the scheduler delivers its tasks; with
/// an [`AlarmScheduler`](crate::AlarmScheduler) wired to the dispatcher that
/// is the dispatch thread.
#[derive(Clone)]
pub struct IdleTracker {
    inner: Arc<Inner>,
}

impl IdleTracker {
    pub fn new(scheduler: SchedulerRef, config: IdleConfig) -> Self {
        let tracker = Self {
            inner: Arc::new(Inner {
                scheduler,
                config,
                tables: Mutex::new(Tables::default()),
                idle_ms: AtomicU64::new(0),
            }),
        };
        restart_idle_counter(&tracker.inner, &mut tracker.inner.tables());
        tracker
    }

    /// Register `callback` to fire after `timeout` of continuous inactivity,
    /// and again after every further `timeout` while still registered.
    ///
    /// # Errors
    ///
    /// Returns [`IdleError::UnsupportedTimeout`] unless `0 < timeout < 24h`.
    pub fn register(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
        timeout: Duration,
    ) -> Result<IdleListenerId, IdleError> {
        if timeout.is_zero() || timeout >= MAX_IDLE_TIMEOUT {
            return Err(IdleError::UnsupportedTimeout(timeout));
        }

        let mut tables = self.inner.tables();
        let id = IdleListenerId(tables.next_id());
        tables.idle.insert(
            id,
            IdleListener {
                callback: Arc::new(callback),
                timeout,
                generation: 0,
                pending: None,
            },
        );
        schedule_fire(&self.inner, &mut tables, id);
        tracing::debug!(listener = %id, ?timeout, "Idle listener registered");
        Ok(id)
    }

    /// Remove an idle listener and cancel its pending firing.
    ///
    /// # Errors
    ///
    /// Returns [`IdleError::UnknownListener`] if `id` was never registered or
    /// was already removed.
    pub fn unregister(&self, id: IdleListenerId) -> Result<(), IdleError> {
        let removed = self.inner.tables().idle.remove(&id);
        match removed {
            Some(listener) => {
                if let Some(timer) = listener.pending {
                    self.inner.scheduler.cancel(timer);
                }
                tracing::debug!(listener = %id, "Idle listener removed");
                Ok(())
            }
            None => {
                tracing::error!(listener = %id, "Removing unknown idle listener");
                Err(IdleError::UnknownListener(id))
            }
        }
    }

    /// Register a callback run on every qualifying input event.
    ///
    /// With an `owner`, the listener is removed when the owner is disposed.
    pub fn register_activity(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
        owner: Option<&Lifetime>,
    ) -> ActivityListenerId {
        let id = {
            let mut tables = self.inner.tables();
            let id = ActivityListenerId(tables.next_id());
            tables.activity.insert(id, Arc::new(callback));
            id
        };
        if let Some(owner) = owner {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            owner.on_dispose(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.tables().activity.remove(&id);
                }
            });
        }
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_activity(&self, id: ActivityListenerId) -> bool {
        self.inner.tables().activity.remove(&id).is_some()
    }

    /// Account for an event about to be delivered.
    ///
    /// Activity-relevant events (input, focus, window) reschedule every idle
    /// listener from zero. Qualifying input also restarts the idle-time
    /// counter; the activity callbacks to run are returned so the caller can
    /// run each one in isolation.
    pub fn observe(&self, event: &Event) -> Vec<ActivityCallback> {
        let class = event.class();
        if !class.contains(EventClass::ACTIVITY) {
            return Vec::new();
        }

        let mut tables = self.inner.tables();
        let ids: Vec<IdleListenerId> = tables.idle.keys().copied().collect();
        for id in ids {
            schedule_fire(&self.inner, &mut tables, id);
        }

        if !class.contains(EventClass::QUALIFYING_INPUT) {
            return Vec::new();
        }
        restart_idle_counter(&self.inner, &mut tables);
        tables.activity.values().cloned().collect()
    }

    /// Total accumulated idle time, as measured by the telemetry tick.
    pub fn idle_time(&self) -> Duration {
        Duration::from_millis(self.inner.idle_ms.load(Ordering::Relaxed))
    }

    /// Stop the telemetry tick. [`idle_time`](Self::idle_time) stays frozen
    /// until the next qualifying input restarts it.
    pub fn stop_idle_time_calculation(&self) {
        let timer = self.inner.tables().tick.take();
        if let Some(timer) = timer {
            self.inner.scheduler.cancel(timer);
        }
    }

    pub fn idle_listener_count(&self) -> usize {
        self.inner.tables().idle.len()
    }

    pub fn activity_listener_count(&self) -> usize {
        self.inner.tables().activity.len()
    }
}

/// Cancel any pending firing for `id` and schedule a fresh one.
fn schedule_fire(inner: &Arc<Inner>, tables: &mut Tables, id: IdleListenerId) {
    let Some(listener) = tables.idle.get_mut(&id) else {
        return;
    };
    if let Some(timer) = listener.pending.take() {
        inner.scheduler.cancel(timer);
    }
    listener.generation += 1;
    let generation = listener.generation;
    let weak = Arc::downgrade(inner);
    let timer = inner.scheduler.schedule(
        listener.timeout,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                fire(&inner, id, generation);
            }
        }),
    );
    listener.pending = Some(timer);
}

fn fire(inner: &Arc<Inner>, id: IdleListenerId, generation: u64) {
    let callback = {
        let mut tables = inner.tables();
        let Some(listener) = tables.idle.get_mut(&id) else {
            return;
        };
        if listener.generation != generation {
            tracing::trace!(listener = %id, "Stale idle timer ignored");
            return;
        }
        listener.pending = None;
        Arc::clone(&listener.callback)
    };

    tracing::trace!(listener = %id, "Idle listener firing");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback()));

    {
        let mut tables = inner.tables();
        let needs_timer = tables
            .idle
            .get(&id)
            .is_some_and(|listener| listener.pending.is_none());
        if needs_timer {
            schedule_fire(inner, &mut tables, id);
        }
    }

    if let Err(payload) = outcome {
        panic::resume_unwind(payload);
    }
}

fn restart_idle_counter(inner: &Arc<Inner>, tables: &mut Tables) {
    if inner.config.headless {
        return;
    }
    if let Some(timer) = tables.tick.take() {
        inner.scheduler.cancel(timer);
    }
    tables.last_active = Some(inner.scheduler.now());
    let weak = Arc::downgrade(inner);
    let timer = inner.scheduler.schedule(
        inner.config.tick,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut tables = inner.tables();
                tables.tick = None;
                if let Some(since) = tables.last_active {
                    let quiet = inner.scheduler.now().saturating_duration_since(since);
                    inner
                        .idle_ms
                        .fetch_add(quiet.as_millis() as u64, Ordering::Relaxed);
                }
                restart_idle_counter(&inner, &mut tables);
            }
        }),
    );
    tables.tick = Some(timer);
}
