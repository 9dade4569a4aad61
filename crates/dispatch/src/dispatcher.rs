//! The central event dispatcher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use switchyard_events::{
    Event, EventClass, EventId, EventKind, InvocationTag, Lifetime, MouseEvent, MousePhase,
    SourceId, Task, WindowPhase,
};
use switchyard_idle::{
    ActivityListenerId, AlarmScheduler, IdleConfig, IdleListenerId, IdleTracker, SchedulerRef,
};
use switchyard_lock::IntentLockRef;
use switchyard_queue::ToolkitRef;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result, Stage};
use crate::focus_ledger::{Continuation, FocusLedger, LedgerEntry};
use crate::hooks::{
    KeyDispatcherRef, MouseDispatcherRef, NoQuirks, NoopKeyDispatcher, NoopMouseDispatcher,
    PlatformQuirksRef, PostEventHook,
};
use crate::interceptor::{Interceptor, InterceptorChain, InterceptorId};
use crate::lock_bridge::{LockBridge, LockMode, LockPolicy};
use crate::mouse::{BlockMode, MouseRouter};
use crate::normalizer::InputNormalizer;
use crate::report::{isolate, ReportSinkRef, TracingReportSink};
use crate::sequenced::SequencedGuard;
use crate::thread::DispatchThread;

/// Handle for a registered [`PostEventHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostHookId(u64);

/// Serializes delivery of every event destined for the application.
///
/// One thread runs the loop ([`run_forever`](Self::run_forever),
/// [`dispatch_next`](Self::dispatch_next), [`flush_queue`](Self::flush_queue),
/// [`pump_until`](Self::pump_until)); any thread may post events, register
/// listeners and query counters. Handlers may re-enter the loop. No internal
/// lock is held while an event is delivered.
pub struct Dispatcher {
    this: Weak<Dispatcher>,
    config: DispatchConfig,
    toolkit: ToolkitRef,
    lock_bridge: LockBridge,
    idle: IdleTracker,
    normalizer: InputNormalizer,
    quirks: PlatformQuirksRef,
    key_dispatcher: KeyDispatcherRef,
    mouse_dispatcher: MouseDispatcherRef,
    report: ReportSinkRef,
    pre: InterceptorChain,
    post: InterceptorChain,
    post_hooks: Mutex<Vec<(PostHookId, Arc<dyn PostEventHook>)>>,
    next_hook_id: AtomicU64,
    ledger: FocusLedger,
    sequenced: SequencedGuard,
    mouse: MouseRouter,
    thread: DispatchThread,
    keys_posted: AtomicU64,
    keys_dispatched: AtomicU64,
    event_count: AtomicU64,
    current: Mutex<Option<Event>>,
    in_input_event: AtomicBool,
    keyboard_busy: AtomicBool,
    ready_tasks: Mutex<VecDeque<Task>>,
    app_active: AtomicBool,
    last_event_ms: AtomicI64,
    shutdown: CancellationToken,
}

/// Builder for [`Dispatcher`]. Every collaborator except the toolkit queue
/// has a default.
pub struct DispatcherBuilder {
    toolkit: ToolkitRef,
    config: DispatchConfig,
    scheduler: Option<SchedulerRef>,
    intent_lock: Option<IntentLockRef>,
    report: ReportSinkRef,
    key_dispatcher: KeyDispatcherRef,
    mouse_dispatcher: MouseDispatcherRef,
    quirks: PlatformQuirksRef,
    shutdown: CancellationToken,
}

impl DispatcherBuilder {
    /// Dispatcher and normalizer settings. Defaults to [`DispatchConfig::default`].
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Timer source for idle listeners. Defaults to an [`AlarmScheduler`]
    /// whose due tasks are posted to the dispatch thread.
    pub fn scheduler(mut self, scheduler: SchedulerRef) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Install the intent lock manager up front. Without one, delivery is
    /// bare until [`Dispatcher::install_intent_lock`] is called.
    pub fn intent_lock(mut self, lock: IntentLockRef) -> Self {
        self.intent_lock = Some(lock);
        self
    }

    /// Where isolated handler failures go. Defaults to [`TracingReportSink`].
    pub fn report_sink(mut self, report: ReportSinkRef) -> Self {
        self.report = report;
        self
    }

    /// Shortcut dispatcher offered every key event before the toolkit.
    pub fn key_dispatcher(mut self, key_dispatcher: KeyDispatcherRef) -> Self {
        self.key_dispatcher = key_dispatcher;
        self
    }

    /// Shortcut dispatcher offered mouse events before the toolkit.
    pub fn mouse_dispatcher(mut self, mouse_dispatcher: MouseDispatcherRef) -> Self {
        self.mouse_dispatcher = mouse_dispatcher;
        self
    }

    /// Hook run on every event after input normalization.
    pub fn platform_quirks(mut self, quirks: PlatformQuirksRef) -> Self {
        self.quirks = quirks;
        self
    }

    /// Share a cancellation token that stops [`Dispatcher::run_forever`].
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the dispatcher. Idle telemetry starts unless the config is headless.
    pub fn build(self) -> Arc<Dispatcher> {
        Arc::new_cyclic(|this: &Weak<Dispatcher>| {
            let scheduler: SchedulerRef = match self.scheduler {
                Some(scheduler) => scheduler,
                None => {
                    let weak = this.clone();
                    Arc::new(AlarmScheduler::start(Arc::new(move |task: Task| {
                        if let Some(dispatcher) = weak.upgrade() {
                            dispatcher.post_later(task);
                        }
                    })))
                }
            };
            let idle = IdleTracker::new(
                scheduler,
                IdleConfig {
                    tick: self.config.idle_tick(),
                    headless: self.config.headless,
                },
            );
            let policy = LockPolicy::from_config(&self.config);
            let lock_bridge = match self.intent_lock {
                Some(lock) => LockBridge::with_manager(policy, lock),
                None => LockBridge::new(policy),
            };

            Dispatcher {
                this: this.clone(),
                normalizer: InputNormalizer::new(&self.config),
                mouse: MouseRouter::new(&self.config),
                config: self.config,
                toolkit: self.toolkit,
                lock_bridge,
                idle,
                quirks: self.quirks,
                key_dispatcher: self.key_dispatcher,
                mouse_dispatcher: self.mouse_dispatcher,
                report: self.report,
                pre: InterceptorChain::new(Stage::PreInterceptor),
                post: InterceptorChain::new(Stage::PostInterceptor),
                post_hooks: Mutex::new(Vec::new()),
                next_hook_id: AtomicU64::new(1),
                ledger: FocusLedger::default(),
                sequenced: SequencedGuard::default(),
                thread: DispatchThread::unbound(),
                keys_posted: AtomicU64::new(0),
                keys_dispatched: AtomicU64::new(0),
                event_count: AtomicU64::new(0),
                current: Mutex::new(None),
                in_input_event: AtomicBool::new(false),
                keyboard_busy: AtomicBool::new(false),
                ready_tasks: Mutex::new(VecDeque::new()),
                app_active: AtomicBool::new(true),
                last_event_ms: AtomicI64::new(0),
                shutdown: self.shutdown,
            }
        })
    }
}

impl Dispatcher {
    /// Start building a dispatcher over `toolkit`.
    pub fn builder(toolkit: ToolkitRef) -> DispatcherBuilder {
        DispatcherBuilder {
            toolkit,
            config: DispatchConfig::default(),
            scheduler: None,
            intent_lock: None,
            report: Arc::new(TracingReportSink),
            key_dispatcher: Arc::new(NoopKeyDispatcher),
            mouse_dispatcher: Arc::new(NoopMouseDispatcher),
            quirks: Arc::new(NoQuirks),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Install the intent lock manager once it exists.
    ///
    /// # Errors
    ///
    /// [`DispatchError::LockManagerInstalled`] on a second install.
    pub fn install_intent_lock(&self, lock: IntentLockRef) -> Result<()> {
        self.lock_bridge.install(lock)?;
        tracing::info!("Intent lock manager installed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Loop
    // ---------------------------------------------------------------------

    /// Dispatch events until the shutdown token is cancelled or the toolkit
    /// queue closes.
    ///
    /// # Errors
    ///
    /// Only a [`DispatchError::ConsistencyViolation`] stops the loop early.
    pub fn run_forever(&self) -> Result<()> {
        self.thread.rebind();
        tracing::info!("Dispatch loop started");
        while !self.shutdown.is_cancelled() {
            if !self.dispatch_next()? {
                tracing::info!("Toolkit queue closed");
                break;
            }
        }
        tracing::info!(events = self.event_count(), "Dispatch loop stopped");
        Ok(())
    }

    /// Cancel the shutdown token and wake the loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        // Wakes a loop parked on an empty queue; harmless if already closed.
        let _ = self
            .toolkit
            .post(Event::invocation(SourceId::DISPATCHER, InvocationTag::LATER, || {}));
    }

    /// A clone of the token [`shutdown`](Self::shutdown) cancels.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Pull one event (blocking) and dispatch it.
    ///
    /// The calling thread becomes the dispatch thread. Returns `Ok(false)`
    /// once the toolkit queue is closed and drained.
    pub fn dispatch_next(&self) -> Result<bool> {
        self.thread.rebind();
        match self.pull_next() {
            Some(event) => {
                self.dispatch_event(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Dispatch queued events until the queue is empty.
    ///
    /// The calling thread becomes the dispatch thread, even when the queue
    /// is already empty.
    pub fn flush_queue(&self) -> Result<()> {
        self.thread.rebind();
        while self.toolkit.peek().is_some() {
            if !self.dispatch_next()? {
                break;
            }
        }
        Ok(())
    }

    /// Modal pump: dispatch events until `exit` is cancelled.
    ///
    /// Input events whose source is outside `scope` are consumed without
    /// delivery. `exit` is checked between events; a pump parked on an
    /// empty queue notices cancellation with the next event.
    pub fn pump_until(
        &self,
        exit: &CancellationToken,
        scope: impl Fn(SourceId) -> bool,
    ) -> Result<()> {
        self.thread.rebind();
        tracing::debug!("Modal pump started");
        while !exit.is_cancelled() {
            let Some(mut event) = self.pull_next() else {
                break;
            };
            if event.class().contains(EventClass::USER_INPUT) && !scope(event.source()) {
                self.count_dispatched_key(&event)?;
                tracing::trace!(
                    event = %event.id(),
                    source = %event.source(),
                    "Input outside modal scope consumed"
                );
                event.consume();
                continue;
            }
            self.dispatch_event(event)?;
        }
        tracing::debug!("Modal pump finished");
        Ok(())
    }

    fn pull_next(&self) -> Option<Event> {
        let mut pulled = None;
        self.lock_bridge
            .run_unlocking(&mut || pulled = self.toolkit.pull_next());
        pulled
    }

    /// Count a key event leaving the queue and check it was posted through
    /// [`post_event`](Self::post_event).
    fn count_dispatched_key(&self, event: &Event) -> Result<()> {
        if event.class().contains(EventClass::KEYBOARD) {
            let dispatched = self.keys_dispatched.fetch_add(1, Ordering::SeqCst) + 1;
            let posted = self.keys_posted.load(Ordering::SeqCst);
            if dispatched > posted {
                tracing::error!(
                    posted,
                    dispatched,
                    event = %event.id(),
                    "Key event counters out of sync"
                );
                return Err(DispatchError::ConsistencyViolation {
                    posted,
                    dispatched,
                    event: event.id(),
                });
            }
        }
        Ok(())
    }

    /// Dispatch an event that was already taken off the queue.
    ///
    /// The calling thread becomes the dispatch thread. Key events are
    /// counted against those posted through [`post_event`](Self::post_event).
    ///
    /// # Errors
    ///
    /// [`DispatchError::ConsistencyViolation`] when more key events were
    /// dispatched than posted; the event is not delivered.
    pub fn dispatch_event(&self, event: Event) -> Result<()> {
        self.count_dispatched_key(&event)?;
        self.sequenced.enter(&event);
        self.thread.rebind();
        self.check_for_time_jump();

        let app_active = self.app_active.load(Ordering::SeqCst);
        let event = self.normalizer.normalize(event, app_active);
        let mut event = self.quirks.adjust(event);
        let id = event.id();

        let was_input = self
            .in_input_event
            .swap(event.class().contains(EventClass::INPUT), Ordering::SeqCst);
        let previous = self.replace_current(Some(event.clone()));

        let mode = self.lock_bridge.classify(&event);
        tracing::trace!(event = %id, kind = event.kind().name(), ?mode, "Dispatching");
        self.lock_bridge.run(mode, &mut || {
            isolate(self.report.as_ref(), Stage::Delivery, Some(id), || {
                self.deliver(&mut event);
                Ok(())
            });
        });

        self.in_input_event.store(was_input, Ordering::SeqCst);
        self.replace_current(previous);
        self.sequenced.leave(id);
        Ok(())
    }

    fn deliver(&self, event: &mut Event) {
        let id = event.id();
        let class = event.class();

        self.track_app_activation(event);
        self.event_count.fetch_add(1, Ordering::SeqCst);
        self.keyboard_busy.store(
            class.contains(EventClass::KEYBOARD) || self.keys_in_flight(),
            Ordering::SeqCst,
        );

        for callback in self.idle.observe(event) {
            isolate(self.report.as_ref(), Stage::ActivityListener, Some(id), || {
                callback();
                Ok(())
            });
        }

        if self.pre.run_until_consumed(event, self.report.as_ref()) {
            tracing::debug!(event = %id, "Event handled by pre-dispatch interceptor");
        } else {
            isolate(self.report.as_ref(), Stage::Route, Some(id), || self.route(event));
        }

        self.refresh_current(event);
        self.post.run_all(event, self.report.as_ref());

        if class.contains(EventClass::KEYBOARD) {
            self.keyboard_busy
                .store(self.keys_in_flight(), Ordering::SeqCst);
            self.maybe_ready();
        }
        if class.contains(EventClass::FOCUS_TRANSITION) {
            self.on_focus_event(event);
        }
    }

    fn route(&self, event: &mut Event) -> anyhow::Result<()> {
        let class = event.class();
        if class.contains(EventClass::KEYBOARD) {
            if self.key_dispatcher.dispatch_key(event) {
                tracing::debug!(event = %event.id(), "Key event matched a shortcut");
                event.consume();
            }
            self.default_deliver(event)
        } else if event.as_mouse().is_some() {
            self.route_mouse(event)
        } else {
            self.default_deliver(event)
        }
    }

    fn route_mouse(&self, event: &mut Event) -> anyhow::Result<()> {
        let block = self.mouse.observe(event);
        if block == Some(BlockMode::Complete) {
            tracing::trace!(event = %event.id(), "Blocked mouse event consumed");
            event.consume();
            return Ok(());
        }
        let Some(mouse) = event.as_mouse().cloned() else {
            return self.default_deliver(event);
        };

        if mouse.phase == MousePhase::Pressed
            && !mouse.legacy_modifiers.is_empty()
            && mouse.modifiers.is_empty()
        {
            // Resets the toolkit's notion of the last mouse target.
            let mut reset = event.derive(EventKind::Mouse(MouseEvent::moved(mouse.x, mouse.y)));
            self.toolkit.deliver(&mut reset)?;
        }

        if let Some(corrected) = self.mouse.corrected_click(&mouse) {
            tracing::debug!(
                event = %event.id(),
                click_count = mouse.click_count,
                "Miscomputed multi-click, re-posting as single click"
            );
            event.consume();
            let copy = event
                .derive(EventKind::Mouse(corrected))
                .with_timestamp(chrono::Utc::now().timestamp_millis());
            if let Err(e) = self.post_event(copy) {
                tracing::warn!("Failed to re-post corrected click: {}", e);
            }
        }

        let shortcuts_blocked = block == Some(BlockMode::ActionsOnly);
        if !shortcuts_blocked && self.mouse_dispatcher.dispatch_mouse(event) {
            tracing::debug!(event = %event.id(), "Mouse event matched a shortcut");
            return Ok(());
        }
        self.default_deliver(event)
    }

    fn default_deliver(&self, event: &mut Event) -> anyhow::Result<()> {
        self.maybe_ready();
        self.refresh_current(event);
        self.toolkit.deliver(event)
    }

    fn on_focus_event(&self, event: &Event) {
        let id = event.id();
        for continuation in self.ledger.drain_through(id) {
            if continuation.is_expired() {
                tracing::trace!(event = %id, "Expired focus continuation skipped");
                continue;
            }
            isolate(self.report.as_ref(), Stage::FocusContinuation, Some(id), || {
                (continuation.task)();
                Ok(())
            });
        }
    }

    fn track_app_activation(&self, event: &Event) {
        let EventKind::Window(window) = event.kind() else {
            return;
        };
        let active = match window.phase {
            WindowPhase::Activated | WindowPhase::GainedFocus => true,
            WindowPhase::Deactivated | WindowPhase::LostFocus if window.opposite.is_none() => false,
            _ => return,
        };
        if self.app_active.swap(active, Ordering::SeqCst) != active {
            tracing::debug!(active, "Application activation changed");
        }
    }

    fn check_for_time_jump(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        let last = self.last_event_ms.swap(now, Ordering::SeqCst);
        if let Some(back) = time_jump(last, now, self.config.clock_jump_threshold_ms) {
            tracing::warn!(seconds = back / 1000, "System clock jumped back");
        }
    }

    /// Re-snapshot the current event so readers see flags set by routing.
    fn refresh_current(&self, event: &Event) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| c.id() == event.id()) {
            *current = Some(event.clone());
        }
    }

    fn replace_current(&self, event: Option<Event>) -> Option<Event> {
        std::mem::replace(
            &mut *self.current.lock().unwrap_or_else(PoisonError::into_inner),
            event,
        )
    }

    // ---------------------------------------------------------------------
    // Posting
    // ---------------------------------------------------------------------

    /// Post an event to the toolkit queue.
    ///
    /// Producers must post through here rather than straight into the
    /// toolkit: key events are counted and focus transitions recorded in the
    /// focus ledger on the way in.
    pub fn post_event(&self, event: Event) -> Result<()> {
        for hook in self.post_hook_snapshot() {
            if hook.on_post(&event) {
                tracing::trace!(event = %event.id(), "Event swallowed by post hook");
                return Ok(());
            }
        }

        let id = event.id();
        let is_key = event.class().contains(EventClass::KEYBOARD);
        if is_key {
            self.keys_posted.fetch_add(1, Ordering::SeqCst);
        }
        self.ledger.record(&event);

        if let Err(e) = self.toolkit.post(event) {
            if is_key {
                self.keys_posted.fetch_sub(1, Ordering::SeqCst);
            }
            self.ledger.forget(id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Post `task` to run on the dispatch thread.
    pub fn invoke_later(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        self.post_event(Event::invocation(
            SourceId::DISPATCHER,
            InvocationTag::LATER,
            task,
        ))
    }

    fn post_later(&self, task: Task) {
        if let Err(e) = self.invoke_later(task) {
            tracing::warn!("Dropping deferred task: {}", e);
        }
    }

    /// Register a hook that sees every posted event before it is queued.
    pub fn add_post_event_hook(
        &self,
        hook: impl PostEventHook + 'static,
        owner: Option<&Lifetime>,
    ) -> PostHookId {
        let id = PostHookId(self.next_hook_id.fetch_add(1, Ordering::Relaxed));
        self.post_hooks().push((id, Arc::new(hook)));
        if let Some(owner) = owner {
            let weak = self.this.clone();
            owner.on_dispose(move || {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.remove_post_event_hook(id);
                }
            });
        }
        id
    }

    /// Remove a post hook. Returns `false` if it was already gone.
    pub fn remove_post_event_hook(&self, id: PostHookId) -> bool {
        let mut hooks = self.post_hooks();
        let before = hooks.len();
        hooks.retain(|(hook, _)| *hook != id);
        hooks.len() != before
    }

    fn post_hooks(&self) -> MutexGuard<'_, Vec<(PostHookId, Arc<dyn PostEventHook>)>> {
        self.post_hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post_hook_snapshot(&self) -> Vec<Arc<dyn PostEventHook>> {
        self.post_hooks()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Add an interceptor that may handle events before routing.
    ///
    /// The first one returning `true` consumes the event and routing is skipped.
    pub fn add_pre_dispatch_interceptor(
        &self,
        interceptor: impl Interceptor + 'static,
        owner: Option<&Lifetime>,
    ) -> InterceptorId {
        self.pre.add(Arc::new(interceptor), owner)
    }

    /// Returns `false` if the interceptor was already removed.
    pub fn remove_pre_dispatch_interceptor(&self, id: InterceptorId) -> bool {
        self.pre.remove(id)
    }

    /// Add an interceptor run after routing, whatever the pre chain decided.
    pub fn add_post_dispatch_interceptor(
        &self,
        interceptor: impl Interceptor + 'static,
        owner: Option<&Lifetime>,
    ) -> InterceptorId {
        self.post.add(Arc::new(interceptor), owner)
    }

    /// Returns `false` if the interceptor was already removed.
    pub fn remove_post_dispatch_interceptor(&self, id: InterceptorId) -> bool {
        self.post.remove(id)
    }

    /// See [`IdleTracker::register`].
    pub fn register_idle_listener(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
        timeout: Duration,
    ) -> Result<IdleListenerId> {
        Ok(self.idle.register(callback, timeout)?)
    }

    /// See [`IdleTracker::unregister`].
    pub fn unregister_idle_listener(&self, id: IdleListenerId) -> Result<()> {
        Ok(self.idle.unregister(id)?)
    }

    /// Run `callback` on every qualifying input event, until `owner` is disposed.
    pub fn register_activity_listener(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
        owner: Option<&Lifetime>,
    ) -> ActivityListenerId {
        self.idle.register_activity(callback, owner)
    }

    /// Returns `false` if the listener was already removed.
    pub fn remove_activity_listener(&self, id: ActivityListenerId) -> bool {
        self.idle.remove_activity(id)
    }

    /// Run `task` once in-flight focus transitions have been dispatched.
    ///
    /// Runs immediately when no focus-gained event is outstanding: inline on
    /// the dispatch thread, or posted to it from any other thread.
    pub fn defer_until_focus_settles(&self, task: impl FnOnce() + Send + 'static) {
        self.defer(Continuation {
            task: Box::new(task),
            expiry: None,
        });
    }

    /// Like [`defer_until_focus_settles`](Self::defer_until_focus_settles),
    /// but skipped if `expiry` is cancelled by the time it would run.
    pub fn defer_until_focus_settles_unless(
        &self,
        expiry: CancellationToken,
        task: impl FnOnce() + Send + 'static,
    ) {
        self.defer(Continuation {
            task: Box::new(task),
            expiry: Some(expiry),
        });
    }

    fn defer(&self, continuation: Continuation) {
        let Some(continuation) = self.ledger.attach(continuation) else {
            return;
        };
        if self.thread.is_current() {
            if !continuation.is_expired() {
                isolate(self.report.as_ref(), Stage::Task, None, || {
                    (continuation.task)();
                    Ok(())
                });
            }
            return;
        }
        self.post_later(Box::new(move || {
            if !continuation.is_expired() {
                (continuation.task)();
            }
        }));
    }

    /// Block the rest of the mouse sequence started by `seed`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotAMouseEvent`] when `seed` is not a mouse event.
    pub fn block_next_mouse_events(&self, seed: &Event, mode: BlockMode) -> Result<()> {
        self.mouse.block(seed, mode)
    }

    /// Run `task` once the keyboard is idle: no key event queued or being
    /// delivered, and the key dispatcher not mid-shortcut.
    pub fn do_when_ready(&self, task: impl FnOnce() + Send + 'static) {
        if self.thread.is_current() {
            self.ready_queue().push_back(Box::new(task));
            self.maybe_ready();
            return;
        }
        let weak = self.this.clone();
        self.post_later(Box::new(move || {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.ready_queue().push_back(Box::new(task));
                dispatcher.maybe_ready();
            }
        }));
    }

    fn ready_queue(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.ready_tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_ready(&self) {
        if !self.is_ready() {
            return;
        }
        loop {
            let Some(task) = self.ready_queue().pop_front() else {
                break;
            };
            isolate(self.report.as_ref(), Stage::ReadyCallback, None, || {
                task();
                Ok(())
            });
        }
    }

    /// Whether [`do_when_ready`](Self::do_when_ready) tasks would run now.
    pub fn is_ready(&self) -> bool {
        !self.keyboard_busy.load(Ordering::SeqCst)
            && !self.keys_in_flight()
            && self.key_dispatcher.is_ready()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Whether a focus transition has been posted but not yet dispatched.
    pub fn has_focus_events_pending(&self) -> bool {
        !self.ledger.is_empty()
    }

    /// Outstanding focus ledger entries, oldest first.
    pub fn ledger_state(&self) -> Vec<LedgerEntry> {
        self.ledger.state()
    }

    /// Whether `event` is a mouse event or a mouse press, release or click
    /// is waiting in the queue.
    pub fn is_mouse_event_ahead(&self, event: Option<&Event>) -> bool {
        event.is_some_and(|e| e.as_mouse().is_some())
            || self.toolkit.any_pending(&|queued: &Event| {
                queued.as_mouse().is_some_and(|m| {
                    matches!(
                        m.phase,
                        MousePhase::Pressed | MousePhase::Released | MousePhase::Clicked
                    )
                })
            })
    }

    /// A snapshot of the event being dispatched right now, if any.
    ///
    /// Refreshed before toolkit delivery and before the post-dispatch chain,
    /// so a consumed flag set by routing is visible to both.
    pub fn current_event(&self) -> Option<Event> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the event being dispatched is an input event.
    pub fn is_in_input_event(&self) -> bool {
        self.in_input_event.load(Ordering::SeqCst)
    }

    /// Events delivered since start, including nested deliveries.
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    /// Overwrite the event counter. Intended for test harnesses.
    pub fn set_event_count(&self, count: u64) {
        self.event_count.store(count, Ordering::SeqCst);
    }

    /// `(posted, dispatched)` key event counters.
    pub fn key_event_counts(&self) -> (u64, u64) {
        (
            self.keys_posted.load(Ordering::SeqCst),
            self.keys_dispatched.load(Ordering::SeqCst),
        )
    }

    fn keys_in_flight(&self) -> bool {
        let (posted, dispatched) = self.key_event_counts();
        posted > dispatched
    }

    /// Whether one of the application's windows is active.
    pub fn is_app_active(&self) -> bool {
        self.app_active.load(Ordering::SeqCst)
    }

    /// Whether the emulated META modifier is currently latched.
    pub fn is_meta_latched(&self) -> bool {
        self.normalizer.is_meta_latched()
    }

    /// The sequenced event currently being dispatched, if any.
    pub fn outstanding_sequenced(&self) -> Option<EventId> {
        self.sequenced.outstanding()
    }

    /// Idle time accumulated by the telemetry tick.
    pub fn idle_time(&self) -> Duration {
        self.idle.idle_time()
    }

    /// Freeze [`idle_time`](Self::idle_time) until the next qualifying input.
    pub fn stop_idle_time_calculation(&self) {
        self.idle.stop_idle_time_calculation();
    }

    /// How `event` would be delivered with respect to write intent.
    pub fn lock_mode(&self, event: &Event) -> LockMode {
        self.lock_bridge.classify(event)
    }
}

/// How far the clock went back, if beyond `threshold_ms`.
fn time_jump(last_ms: i64, now_ms: i64, threshold_ms: i64) -> Option<i64> {
    (last_ms > now_ms.saturating_add(threshold_ms)).then(|| last_ms.saturating_sub(now_ms))
}
