//! Integration tests for the dispatch core.
//!
//! Every test drives a real [`Dispatcher`] over an [`InMemoryToolkit`], with
//! a [`ManualScheduler`] standing in for wall-clock timers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use switchyard_dispatch::{
    BlockMode, DispatchConfig, DispatchError, Dispatcher, DispatcherBuilder, InMemoryReportSink,
    KeyDispatcher, MouseDispatcher, Stage,
};
use switchyard_events::{
    Event, EventId, EventKind, FocusEvent, InvocationTag, KeyCode, KeyEvent, Lifetime, Modifiers,
    MouseEvent, SourceId,
};
use switchyard_idle::ManualScheduler;
use switchyard_queue::{InMemoryToolkit, ToolkitQueue};

const SRC: SourceId = SourceId::new(1);

fn builder(toolkit: &Arc<InMemoryToolkit>) -> DispatcherBuilder {
    Dispatcher::builder(toolkit.clone())
        .config(DispatchConfig::headless())
        .scheduler(Arc::new(ManualScheduler::new()))
}

fn harness() -> (Arc<InMemoryToolkit>, Arc<Dispatcher>) {
    let toolkit = Arc::new(InMemoryToolkit::new());
    let dispatcher = builder(&toolkit).build();
    (toolkit, dispatcher)
}

fn typed(c: char) -> Event {
    Event::key(SRC, KeyEvent::typed(c))
}

fn invocation(tag: InvocationTag) -> Event {
    Event::invocation(SRC, tag, || {})
}

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Route every toolkit delivery into `log` as `delivered:<kind>`.
fn log_deliveries(toolkit: &InMemoryToolkit, log: &Log) {
    let log = Arc::clone(log);
    toolkit.set_handler(move |event| {
        log.lock()
            .unwrap()
            .push(format!("delivered:{}", event.kind().name()));
        Ok(())
    });
}

// =============================================================================
// Ordering Tests
// =============================================================================

mod ordering {
    use super::*;

    #[test]
    fn test_events_delivered_in_post_order() {
        let (toolkit, dispatcher) = harness();
        let events = vec![
            typed('a'),
            invocation(InvocationTag::LATER),
            Event::focus(SRC, FocusEvent::lost(None)),
            typed('b'),
        ];
        let ids: Vec<EventId> = events.iter().map(Event::id).collect();
        for event in events {
            dispatcher.post_event(event).unwrap();
        }

        dispatcher.flush_queue().unwrap();

        assert_eq!(toolkit.delivered_ids(), ids);
        assert!(toolkit.is_empty());
    }

    #[test]
    fn test_concurrent_producers_keep_their_own_order() {
        let (toolkit, dispatcher) = harness();
        let producers: Vec<_> = (1..=4)
            .map(|n| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let event = Event::new(SourceId::new(n), EventKind::Other("tick".into()));
                        dispatcher.post_event(event).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        dispatcher.flush_queue().unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered.len(), 200);
        for n in 1..=4 {
            let ids: Vec<EventId> = delivered
                .iter()
                .filter(|e| e.source() == SourceId::new(n))
                .map(Event::id)
                .collect();
            assert_eq!(ids.len(), 50);
            assert!(ids.windows(2).all(|w| w[0] < w[1]), "producer {n} reordered");
        }
    }

    #[test]
    fn test_handler_posting_during_delivery_goes_to_tail() {
        let (toolkit, dispatcher) = harness();
        let weak = Arc::downgrade(&dispatcher);
        let follow_up = Arc::new(Mutex::new(None));
        {
            let follow_up = Arc::clone(&follow_up);
            toolkit.set_handler(move |event| {
                if event.as_key().is_some_and(|k| k.ch == Some('a')) {
                    let extra = typed('z');
                    *follow_up.lock().unwrap() = Some(extra.id());
                    weak.upgrade().unwrap().post_event(extra).unwrap();
                }
                Ok(())
            });
        }
        let a = typed('a');
        let b = typed('b');
        let (a_id, b_id) = (a.id(), b.id());
        dispatcher.post_event(a).unwrap();
        dispatcher.post_event(b).unwrap();

        dispatcher.flush_queue().unwrap();

        let z_id = follow_up.lock().unwrap().unwrap();
        assert_eq!(toolkit.delivered_ids(), vec![a_id, b_id, z_id]);
        assert_eq!(dispatcher.key_event_counts(), (3, 3));
    }
}

// =============================================================================
// Idle And Activity Tests
// =============================================================================

mod idle {
    use super::*;
    use switchyard_idle::IdleError;

    fn idle_harness() -> (Arc<ManualScheduler>, Arc<Dispatcher>) {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let dispatcher = Dispatcher::builder(toolkit)
            .config(DispatchConfig::headless())
            .scheduler(scheduler.clone())
            .build();
        (scheduler, dispatcher)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_idle_listener_rescheduled_by_input() {
        let (scheduler, dispatcher) = idle_harness();
        let (fired, callback) = counter();
        dispatcher
            .register_idle_listener(callback, Duration::from_millis(100))
            .unwrap();

        scheduler.advance(Duration::from_millis(60));
        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();

        scheduler.advance(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), 0, "input must restart the timeout");

        scheduler.advance(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        scheduler.advance(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 2, "fires again after each further timeout");
    }

    #[test]
    fn test_invocations_do_not_count_as_activity() {
        let (scheduler, dispatcher) = idle_harness();
        let (fired, callback) = counter();
        dispatcher
            .register_idle_listener(callback, Duration::from_millis(100))
            .unwrap();

        scheduler.advance(Duration::from_millis(90));
        dispatcher.invoke_later(|| {}).unwrap();
        dispatcher.flush_queue().unwrap();
        scheduler.advance(Duration::from_millis(20));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_timeouts_rejected() {
        let (_, dispatcher) = idle_harness();
        for timeout in [Duration::ZERO, Duration::from_secs(24 * 60 * 60)] {
            let result = dispatcher.register_idle_listener(|| {}, timeout);
            assert!(matches!(
                result,
                Err(DispatchError::Idle(IdleError::UnsupportedTimeout(t))) if t == timeout
            ));
        }
    }

    #[test]
    fn test_unregister_cancels_and_rejects_unknown() {
        let (scheduler, dispatcher) = idle_harness();
        let (fired, callback) = counter();
        let id = dispatcher
            .register_idle_listener(callback, Duration::from_millis(10))
            .unwrap();

        dispatcher.unregister_idle_listener(id).unwrap();
        scheduler.advance(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let again = dispatcher.unregister_idle_listener(id);
        assert!(matches!(
            again,
            Err(DispatchError::Idle(IdleError::UnknownListener(_)))
        ));
    }

    #[test]
    fn test_activity_listener_runs_on_qualifying_input_only() {
        let (_, dispatcher) = idle_harness();
        let (count, callback) = counter();
        let owner = Lifetime::new();
        dispatcher.register_activity_listener(callback, Some(&owner));

        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::moved(1, 1)))
            .unwrap();
        dispatcher.flush_queue().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher
            .post_event(Event::key(SRC, KeyEvent::pressed(KeyCode::A, Some('a'))))
            .unwrap();
        dispatcher.flush_queue().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        owner.dispose();
        dispatcher.post_event(typed('b')).unwrap();
        dispatcher.flush_queue().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_activity_listener_is_reported() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let report = Arc::new(InMemoryReportSink::new());
        let dispatcher = builder(&toolkit).report_sink(report.clone()).build();
        dispatcher.register_activity_listener(|| panic!("listener bug"), None);

        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(report.stages(), vec![Stage::ActivityListener]);
        assert_eq!(toolkit.delivered().len(), 1);
    }
}

// =============================================================================
// Key Counter Tests
// =============================================================================

mod counters {
    use super::*;

    #[test]
    fn test_counters_balance_after_flush() {
        let (_, dispatcher) = harness();
        for c in ['a', 'b', 'c'] {
            dispatcher.post_event(typed(c)).unwrap();
        }
        dispatcher.post_event(invocation(InvocationTag::LATER)).unwrap();
        assert_eq!(dispatcher.key_event_counts(), (3, 0));

        dispatcher.flush_queue().unwrap();
        assert_eq!(dispatcher.key_event_counts(), (3, 3));
    }

    #[test]
    fn test_key_event_bypassing_post_is_a_violation() {
        let (toolkit, dispatcher) = harness();
        let rogue = typed('x');
        let rogue_id = rogue.id();
        toolkit.post(rogue).unwrap();

        let result = dispatcher.dispatch_next();

        match result {
            Err(DispatchError::ConsistencyViolation {
                posted,
                dispatched,
                event,
            }) => {
                assert_eq!((posted, dispatched), (0, 1));
                assert_eq!(event, rogue_id);
            }
            other => panic!("expected consistency violation, got {other:?}"),
        }
        assert!(toolkit.delivered().is_empty());
    }

    #[test]
    fn test_run_forever_stops_on_violation() {
        let (toolkit, dispatcher) = harness();
        toolkit.post(typed('x')).unwrap();
        toolkit.close();

        let result = dispatcher.run_forever();
        assert!(matches!(
            result,
            Err(DispatchError::ConsistencyViolation { .. })
        ));
    }
}

// =============================================================================
// Interceptor Tests
// =============================================================================

mod interceptors {
    use super::*;

    fn recording(log: &Log, name: &'static str, consume: bool) -> impl Fn(&mut Event) -> bool {
        let log = Arc::clone(log);
        move |_| {
            log.lock().unwrap().push(name.to_string());
            consume
        }
    }

    #[test]
    fn test_pre_interceptor_short_circuits_routing() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);
        dispatcher.add_pre_dispatch_interceptor(recording(&log, "pre1", false), None);
        dispatcher.add_pre_dispatch_interceptor(recording(&log, "pre2", true), None);
        dispatcher.add_pre_dispatch_interceptor(recording(&log, "pre3", false), None);
        dispatcher.add_post_dispatch_interceptor(recording(&log, "post", false), None);

        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(entries(&log), vec!["pre1", "pre2", "post"]);
        assert!(toolkit.delivered().is_empty());
    }

    #[test]
    fn test_unconsumed_event_reaches_toolkit_then_post_chain() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);
        dispatcher.add_pre_dispatch_interceptor(recording(&log, "pre", false), None);
        dispatcher.add_post_dispatch_interceptor(recording(&log, "post", false), None);

        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(entries(&log), vec!["pre", "delivered:key_typed", "post"]);
    }

    #[test]
    fn test_removal_by_id_and_by_owner() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);
        let owner = Lifetime::new();
        let by_id = dispatcher.add_pre_dispatch_interceptor(recording(&log, "by_id", true), None);
        dispatcher.add_post_dispatch_interceptor(recording(&log, "owned", false), Some(&owner));

        assert!(dispatcher.remove_pre_dispatch_interceptor(by_id));
        assert!(!dispatcher.remove_pre_dispatch_interceptor(by_id));
        owner.dispose();

        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(entries(&log), vec!["delivered:key_typed"]);
    }

    #[test]
    fn test_post_interceptor_failure_is_isolated() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let report = Arc::new(InMemoryReportSink::new());
        let dispatcher = builder(&toolkit).report_sink(report.clone()).build();
        let log = log();
        dispatcher.add_post_dispatch_interceptor(recording(&log, "first", false), None);
        dispatcher.add_post_dispatch_interceptor(|_: &mut Event| -> bool { panic!("boom") }, None);
        dispatcher.add_post_dispatch_interceptor(recording(&log, "third", false), None);

        let event = typed('a');
        let id = event.id();
        dispatcher.post_event(event).unwrap();
        dispatcher.post_event(typed('b')).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(entries(&log), vec!["first", "third", "first", "third"]);
        let failures = report.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].stage, Stage::PostInterceptor);
        assert_eq!(failures[0].event, Some(id));
        assert!(failures[0].cause.contains("boom"));
        assert_eq!(toolkit.delivered().len(), 2);
    }
}

// =============================================================================
// Focus Ledger Tests
// =============================================================================

mod focus {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn push(log: &Log, entry: &'static str) -> impl FnOnce() + Send + 'static {
        let log = Arc::clone(log);
        move || log.lock().unwrap().push(entry.to_string())
    }

    #[test]
    fn test_continuation_runs_inline_without_pending_focus() {
        let (_, dispatcher) = harness();
        let log = log();
        // Binds this thread as the dispatch thread.
        dispatcher.flush_queue().unwrap();

        dispatcher.defer_until_focus_settles(push(&log, "task"));

        assert_eq!(entries(&log), vec!["task"]);
    }

    #[test]
    fn test_continuation_waits_for_dispatch_thread_before_first_pull() {
        let (_, dispatcher) = harness();
        let log = log();

        dispatcher.defer_until_focus_settles(push(&log, "task"));

        assert!(entries(&log).is_empty());
        dispatcher.flush_queue().unwrap();
        assert_eq!(entries(&log), vec!["task"]);
    }

    #[test]
    fn test_loop_thread_runs_continuations_from_building_thread() {
        let (_, dispatcher) = harness();
        let (tx, rx) = std::sync::mpsc::channel();
        let runner = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.run_forever())
        };
        let loop_thread = runner.thread().id();

        dispatcher.defer_until_focus_settles(move || {
            tx.send(thread::current().id()).unwrap();
        });

        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ran_on, loop_thread);
        assert_ne!(ran_on, thread::current().id());
        dispatcher.shutdown();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_continuation_waits_for_focus_gained() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);

        let focus = Event::focus(SRC, FocusEvent::gained(None));
        let focus_id = focus.id();
        dispatcher.post_event(focus).unwrap();
        dispatcher.defer_until_focus_settles(push(&log, "task"));

        assert!(entries(&log).is_empty());
        assert!(dispatcher.has_focus_events_pending());
        let state = dispatcher.ledger_state();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].event, focus_id);
        assert!(state[0].focus_gained);
        assert_eq!(state[0].continuations, 1);

        dispatcher.flush_queue().unwrap();

        assert_eq!(entries(&log), vec!["delivered:focus_gained", "task"]);
        assert!(!dispatcher.has_focus_events_pending());
    }

    #[test]
    fn test_continuation_attaches_to_latest_focus_gained() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);

        dispatcher
            .post_event(Event::focus(SRC, FocusEvent::gained(None)))
            .unwrap();
        dispatcher
            .post_event(Event::focus(SRC, FocusEvent::lost(None)))
            .unwrap();
        dispatcher
            .post_event(Event::focus(SourceId::new(2), FocusEvent::gained(Some(SRC))))
            .unwrap();
        dispatcher.defer_until_focus_settles(push(&log, "task"));

        dispatcher.flush_queue().unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "delivered:focus_gained",
                "delivered:focus_lost",
                "delivered:focus_gained",
                "task"
            ]
        );
    }

    #[test]
    fn test_expired_continuation_skipped() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);
        dispatcher
            .post_event(Event::focus(SRC, FocusEvent::gained(None)))
            .unwrap();

        let expiry = CancellationToken::new();
        dispatcher.defer_until_focus_settles_unless(expiry.clone(), push(&log, "expired"));
        dispatcher.defer_until_focus_settles(push(&log, "kept"));
        expiry.cancel();
        dispatcher.flush_queue().unwrap();

        assert_eq!(entries(&log), vec!["delivered:focus_gained", "kept"]);
    }

    #[test]
    fn test_deferral_from_other_thread_runs_on_dispatch_thread() {
        let (_, dispatcher) = harness();
        let log = log();
        {
            let dispatcher = Arc::clone(&dispatcher);
            let task = push(&log, "task");
            thread::spawn(move || dispatcher.defer_until_focus_settles(task))
                .join()
                .unwrap();
        }
        assert!(entries(&log).is_empty());

        dispatcher.flush_queue().unwrap();
        assert_eq!(entries(&log), vec!["task"]);
    }

    #[test]
    fn test_panicking_continuation_reported() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let report = Arc::new(InMemoryReportSink::new());
        let dispatcher = builder(&toolkit).report_sink(report.clone()).build();
        let log = log();
        dispatcher
            .post_event(Event::focus(SRC, FocusEvent::gained(None)))
            .unwrap();
        dispatcher.defer_until_focus_settles(|| panic!("continuation bug"));
        dispatcher.defer_until_focus_settles(push(&log, "after"));

        dispatcher.flush_queue().unwrap();

        assert_eq!(report.stages(), vec![Stage::FocusContinuation]);
        assert_eq!(entries(&log), vec!["after"]);
    }
}

// =============================================================================
// Reentrancy Tests
// =============================================================================

mod reentrancy {
    use super::*;
    use switchyard_lock::ProcessIntentLock;

    #[test]
    fn test_nested_sequenced_event_disposes_outer_without_deadlock() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let dispatcher = builder(&toolkit)
            .intent_lock(Arc::new(ProcessIntentLock::new()))
            .build();
        let outer_disposals = Arc::new(AtomicUsize::new(0));
        let inner_disposals = Arc::new(AtomicUsize::new(0));

        let outer = {
            let weak = Arc::downgrade(&dispatcher);
            let disposals = Arc::clone(&outer_disposals);
            Event::sequenced(SRC, move || {
                disposals.fetch_add(1, Ordering::SeqCst);
                // Disposal itself dispatches more events.
                let dispatcher = weak.upgrade().unwrap();
                dispatcher.post_event(typed('d')).unwrap();
                dispatcher.flush_queue().unwrap();
            })
        };
        let outer_id = outer.id();
        let inner = {
            let disposals = Arc::clone(&inner_disposals);
            Event::sequenced(SRC, move || {
                disposals.fetch_add(1, Ordering::SeqCst);
            })
        };
        let inner_id = inner.id();
        let inner_slot = Mutex::new(Some(inner));

        {
            let weak = Arc::downgrade(&dispatcher);
            toolkit.set_handler(move |event| {
                if event.id() == outer_id {
                    let dispatcher = weak.upgrade().unwrap();
                    let inner = inner_slot.lock().unwrap().take().unwrap();
                    dispatcher.post_event(inner).unwrap();
                    assert!(dispatcher.dispatch_next().unwrap());
                }
                Ok(())
            });
        }

        dispatcher.post_event(outer).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(outer_disposals.load(Ordering::SeqCst), 1);
        assert_eq!(inner_disposals.load(Ordering::SeqCst), 1);
        assert!(dispatcher.outstanding_sequenced().is_none());
        let kinds: Vec<&'static str> = toolkit
            .delivered()
            .iter()
            .map(|e| e.kind().name())
            .collect();
        assert_eq!(kinds, vec!["sequenced", "key_typed", "sequenced"]);
        assert_eq!(toolkit.delivered_ids()[2], inner_id);
    }

    #[test]
    fn test_nested_dispatch_restores_current_event() {
        let (toolkit, dispatcher) = harness();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let outer = typed('o');
        let outer_id = outer.id();
        {
            let weak = Arc::downgrade(&dispatcher);
            let observed = Arc::clone(&observed);
            toolkit.set_handler(move |event| {
                let dispatcher = weak.upgrade().unwrap();
                if event.id() == outer_id {
                    dispatcher.post_event(invocation(InvocationTag::LATER)).unwrap();
                    dispatcher.dispatch_next().unwrap();
                    observed.lock().unwrap().push((
                        dispatcher.current_event().map(|e| e.id()),
                        dispatcher.is_in_input_event(),
                    ));
                } else {
                    observed.lock().unwrap().push((
                        dispatcher.current_event().map(|e| e.id()),
                        dispatcher.is_in_input_event(),
                    ));
                }
                Ok(())
            });
        }

        dispatcher.post_event(outer).unwrap();
        dispatcher.flush_queue().unwrap();

        let observed = observed.lock().unwrap().clone();
        assert_eq!(observed.len(), 2);
        assert!(!observed[0].1, "invocation is not an input event");
        assert_eq!(observed[1], (Some(outer_id), true));
    }
}

// =============================================================================
// Intent Lock Tests
// =============================================================================

mod locking {
    use super::*;
    use switchyard_dispatch::LockMode;
    use switchyard_lock::{LockCall, RecordingLock};

    fn locked_harness() -> (Arc<RecordingLock>, Arc<InMemoryToolkit>, Arc<Dispatcher>) {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let lock = Arc::new(RecordingLock::new());
        let dispatcher = builder(&toolkit).intent_lock(lock.clone()).build();
        (lock, toolkit, dispatcher)
    }

    #[test]
    fn test_repaint_delivered_without_write_intent() {
        let (lock, toolkit, dispatcher) = locked_harness();
        dispatcher.post_event(invocation(InvocationTag::REPAINT)).unwrap();

        dispatcher.flush_queue().unwrap();

        assert_eq!(lock.count(LockCall::Acquire), 0);
        assert_eq!(lock.count(LockCall::Release), 0);
        assert_eq!(toolkit.delivered().len(), 1);
    }

    #[test]
    fn test_key_event_takes_write_intent_once() {
        let (lock, _, dispatcher) = locked_harness();
        dispatcher.post_event(typed('a')).unwrap();

        dispatcher.flush_queue().unwrap();

        assert_eq!(
            lock.calls(),
            vec![
                LockCall::Unlock,
                LockCall::Relock,
                LockCall::Acquire,
                LockCall::Release
            ]
        );
    }

    #[test]
    fn test_locked_list_and_custom_tags() {
        let (lock, _, dispatcher) = locked_harness();
        assert_eq!(
            dispatcher.lock_mode(&invocation(InvocationTag::FLUSH_NOW)),
            LockMode::WriteIntent
        );
        assert_eq!(
            dispatcher.lock_mode(&invocation(InvocationTag::new("custom"))),
            LockMode::WriteIntent
        );

        dispatcher.post_event(invocation(InvocationTag::FLUSH_NOW)).unwrap();
        dispatcher.flush_queue().unwrap();
        assert_eq!(lock.count(LockCall::Acquire), 1);
    }

    #[test]
    fn test_bare_delivery_until_manager_installed() {
        let (toolkit, dispatcher) = harness();
        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();
        assert_eq!(toolkit.delivered().len(), 1);

        let lock = Arc::new(RecordingLock::new());
        dispatcher.install_intent_lock(lock.clone()).unwrap();
        assert!(matches!(
            dispatcher.install_intent_lock(Arc::new(RecordingLock::new())),
            Err(DispatchError::LockManagerInstalled)
        ));

        dispatcher.post_event(typed('b')).unwrap();
        dispatcher.flush_queue().unwrap();
        assert_eq!(lock.count(LockCall::Acquire), 1);
    }
}

// =============================================================================
// Mouse Routing Tests
// =============================================================================

mod mouse {
    use super::*;

    struct CountingMouse {
        handled: AtomicUsize,
        accept: bool,
    }

    impl MouseDispatcher for CountingMouse {
        fn dispatch_mouse(&self, _event: &mut Event) -> bool {
            self.handled.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    fn mouse_harness(accept: bool) -> (Arc<CountingMouse>, Arc<InMemoryToolkit>, Arc<Dispatcher>) {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let mouse = Arc::new(CountingMouse {
            handled: AtomicUsize::new(0),
            accept,
        });
        let dispatcher = builder(&toolkit).mouse_dispatcher(mouse.clone()).build();
        (mouse, toolkit, dispatcher)
    }

    fn press(source: SourceId, x: i32, y: i32) -> Event {
        Event::mouse(source, MouseEvent::pressed(1, x, y))
    }

    #[test]
    fn test_handled_mouse_event_skips_default_delivery() {
        let (mouse, toolkit, dispatcher) = mouse_harness(true);
        dispatcher.post_event(press(SRC, 0, 0)).unwrap();

        dispatcher.flush_queue().unwrap();

        assert_eq!(mouse.handled.load(Ordering::SeqCst), 1);
        assert!(toolkit.delivered().is_empty());
    }

    #[test]
    fn test_complete_block_consumes_rest_of_sequence() {
        let (_, toolkit, dispatcher) = mouse_harness(false);
        let seed = press(SRC, 5, 5);
        let seed_id = seed.id();
        dispatcher.post_event(seed.clone()).unwrap();
        dispatcher.flush_queue().unwrap();
        dispatcher
            .block_next_mouse_events(&seed, BlockMode::Complete)
            .unwrap();

        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::released(1, 5, 5)))
            .unwrap();
        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::clicked(1, 5, 5, 1)))
            .unwrap();
        let next = press(SRC, 9, 9);
        let next_id = next.id();
        dispatcher.post_event(next).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(toolkit.delivered_ids(), vec![seed_id, next_id]);
    }

    #[test]
    fn test_actions_only_block_skips_shortcuts_but_delivers() {
        let (mouse, toolkit, dispatcher) = mouse_harness(false);
        let seed = press(SRC, 5, 5);
        dispatcher.post_event(seed.clone()).unwrap();
        dispatcher.flush_queue().unwrap();
        dispatcher
            .block_next_mouse_events(&seed, BlockMode::ActionsOnly)
            .unwrap();

        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::released(1, 5, 5)))
            .unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(mouse.handled.load(Ordering::SeqCst), 1, "only the seed press");
        assert_eq!(toolkit.delivered().len(), 2);
    }

    #[test]
    fn test_block_from_other_source_ignored() {
        let (_, toolkit, dispatcher) = mouse_harness(false);
        let seed = press(SRC, 0, 0);
        dispatcher
            .block_next_mouse_events(&seed, BlockMode::Complete)
            .unwrap();

        dispatcher
            .post_event(Event::mouse(SourceId::new(2), MouseEvent::released(1, 0, 0)))
            .unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(toolkit.delivered().len(), 1);
    }

    #[test]
    fn test_block_requires_mouse_seed() {
        let (_, dispatcher) = harness();
        let seed = typed('a');
        assert!(matches!(
            dispatcher.block_next_mouse_events(&seed, BlockMode::Complete),
            Err(DispatchError::NotAMouseEvent(id)) if id == seed.id()
        ));
    }

    #[test]
    fn test_press_with_only_legacy_modifiers_gets_synthetic_move() {
        let (toolkit, dispatcher) = harness();
        let event = Event::mouse(
            SRC,
            MouseEvent::pressed(1, 7, 8)
                .with_modifiers(Modifiers::empty())
                .with_legacy_modifiers(Modifiers::SHIFT),
        );
        let id = event.id();
        dispatcher.post_event(event).unwrap();

        dispatcher.flush_queue().unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered.len(), 2);
        let moved = delivered[0].as_mouse().unwrap();
        assert_eq!((moved.x, moved.y), (7, 8));
        assert_eq!(moved.phase, switchyard_events::MousePhase::Moved);
        assert_eq!(delivered[1].id(), id);
    }

    #[test]
    fn test_miscomputed_double_click_reposted_as_single() {
        let (toolkit, dispatcher) = harness();
        dispatcher.post_event(press(SRC, 0, 0)).unwrap();
        dispatcher.post_event(press(SRC, 200, 200)).unwrap();
        let click = Event::mouse(SRC, MouseEvent::clicked(1, 200, 200, 2));
        let click_id = click.id();
        dispatcher.post_event(click).unwrap();

        dispatcher.flush_queue().unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered.len(), 4);
        assert_eq!(delivered[2].id(), click_id);
        assert!(delivered[2].is_consumed());
        let corrected = delivered[3].as_mouse().unwrap();
        assert_eq!(corrected.click_count, 1);
        assert_ne!(delivered[3].id(), click_id);
    }

    #[test]
    fn test_genuine_double_click_untouched() {
        let (toolkit, dispatcher) = harness();
        dispatcher.post_event(press(SRC, 10, 10)).unwrap();
        dispatcher.post_event(press(SRC, 11, 10)).unwrap();
        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::clicked(1, 11, 10, 2)))
            .unwrap();

        dispatcher.flush_queue().unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered.len(), 3);
        assert!(!delivered[2].is_consumed());
    }

    #[test]
    fn test_mouse_event_ahead() {
        let (_, dispatcher) = harness();
        assert!(!dispatcher.is_mouse_event_ahead(None));
        assert!(dispatcher.is_mouse_event_ahead(Some(&press(SRC, 0, 0))));

        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::moved(1, 1)))
            .unwrap();
        assert!(!dispatcher.is_mouse_event_ahead(None), "moves do not count");

        dispatcher.post_event(press(SRC, 1, 1)).unwrap();
        assert!(dispatcher.is_mouse_event_ahead(None));
    }
}

// =============================================================================
// Keyboard Readiness Tests
// =============================================================================

mod ready {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_runs_immediately_when_idle() {
        let (_, dispatcher) = harness();
        let log = log();
        dispatcher.flush_queue().unwrap();
        let inner = Arc::clone(&log);
        dispatcher.do_when_ready(move || inner.lock().unwrap().push("ready".to_string()));
        assert_eq!(entries(&log), vec!["ready"]);
    }

    #[test]
    fn test_loop_thread_runs_ready_tasks_from_building_thread() {
        let (_, dispatcher) = harness();
        let (tx, rx) = std::sync::mpsc::channel();
        let runner = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.run_forever())
        };
        let loop_thread = runner.thread().id();

        dispatcher.do_when_ready(move || tx.send(thread::current().id()).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), loop_thread);
        dispatcher.shutdown();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_hand_pulled_key_releases_ready_tasks() {
        let (toolkit, dispatcher) = harness();
        dispatcher.post_event(typed('k')).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let event = toolkit.pull_next().unwrap();
        dispatcher.dispatch_event(event).unwrap();
        dispatcher.do_when_ready(move || flag.store(true, Ordering::SeqCst));

        assert_eq!(dispatcher.key_event_counts(), (1, 1));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_waits_for_queued_key_events() {
        let (toolkit, dispatcher) = harness();
        let log = log();
        log_deliveries(&toolkit, &log);
        dispatcher.flush_queue().unwrap();
        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.post_event(typed('b')).unwrap();

        let inner = Arc::clone(&log);
        dispatcher.do_when_ready(move || inner.lock().unwrap().push("ready".to_string()));
        assert!(entries(&log).is_empty());

        dispatcher.flush_queue().unwrap();
        assert_eq!(entries(&log), vec!["delivered:key_typed", "delivered:key_typed", "ready"]);
    }

    struct MidShortcut {
        busy: AtomicBool,
    }

    impl KeyDispatcher for MidShortcut {
        fn dispatch_key(&self, _event: &mut Event) -> bool {
            false
        }

        fn is_ready(&self) -> bool {
            !self.busy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_waits_for_key_dispatcher() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let keys = Arc::new(MidShortcut {
            busy: AtomicBool::new(true),
        });
        let dispatcher = builder(&toolkit).key_dispatcher(keys.clone()).build();
        dispatcher.flush_queue().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        dispatcher.do_when_ready(move || flag.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));

        keys.busy.store(false, Ordering::SeqCst);
        dispatcher.post_event(typed('x')).unwrap();
        dispatcher.flush_queue().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_accepted_shortcut_is_consumed_and_still_delivered() {
        struct Accepting;
        impl KeyDispatcher for Accepting {
            fn dispatch_key(&self, _event: &mut Event) -> bool {
                true
            }
        }
        let toolkit = Arc::new(InMemoryToolkit::new());
        let dispatcher = builder(&toolkit)
            .key_dispatcher(Arc::new(Accepting))
            .build();

        dispatcher.post_event(typed('s')).unwrap();
        dispatcher.flush_queue().unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].is_consumed());
    }
}

// =============================================================================
// Pumping Tests
// =============================================================================

mod pumping {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_flush_on_empty_queue_returns() {
        let (toolkit, dispatcher) = harness();
        dispatcher.flush_queue().unwrap();
        assert!(toolkit.delivered().is_empty());
    }

    #[test]
    fn test_modal_pump_drops_input_outside_scope() {
        let (toolkit, dispatcher) = harness();
        let modal = SourceId::new(10);
        let exit = CancellationToken::new();

        let outside = Event::key(SourceId::new(20), KeyEvent::typed('o'));
        let inside = Event::key(modal, KeyEvent::typed('i'));
        let inside_id = inside.id();
        let later = typed('l');
        dispatcher.post_event(outside).unwrap();
        dispatcher.post_event(inside).unwrap();
        {
            let exit = exit.clone();
            dispatcher.invoke_later(move || exit.cancel()).unwrap();
        }
        dispatcher.post_event(later).unwrap();

        dispatcher.pump_until(&exit, |source| source == modal).unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered[0].id(), inside_id);
        assert_eq!(delivered.len(), 2, "inside key and exit invocation");
        assert_eq!(toolkit.len(), 1, "events after exit stay queued");
        assert_eq!(dispatcher.key_event_counts(), (3, 2));
    }

    #[test]
    fn test_modal_pump_delivers_non_input_from_anywhere() {
        let (toolkit, dispatcher) = harness();
        let exit = CancellationToken::new();
        dispatcher
            .post_event(Event::focus(SourceId::new(30), FocusEvent::gained(None)))
            .unwrap();
        {
            let exit = exit.clone();
            dispatcher.invoke_later(move || exit.cancel()).unwrap();
        }

        dispatcher.pump_until(&exit, |_| false).unwrap();

        assert_eq!(toolkit.delivered().len(), 2);
    }

    #[test]
    fn test_event_count_tracks_dispatched_events() {
        let (_, dispatcher) = harness();
        for c in ['a', 'b', 'c'] {
            dispatcher.post_event(typed(c)).unwrap();
        }
        dispatcher.flush_queue().unwrap();
        assert_eq!(dispatcher.event_count(), 3);
    }
}

// =============================================================================
// Normalization Tests
// =============================================================================

mod normalization {
    use super::*;
    use switchyard_dispatch::hooks::PlatformQuirks;
    use switchyard_events::WindowEvent;
    use switchyard_events::WindowPhase;

    fn delivered_key(toolkit: &InMemoryToolkit, index: usize) -> KeyEvent {
        toolkit.delivered()[index].as_key().unwrap().clone()
    }

    #[test]
    fn test_meta_emulation_end_to_end() {
        let (toolkit, dispatcher) = harness();
        let a = || Event::key(SRC, KeyEvent::pressed(KeyCode::A, Some('a')));
        dispatcher
            .post_event(Event::key(SRC, KeyEvent::pressed(KeyCode::WINDOWS, None)))
            .unwrap();
        dispatcher.post_event(a()).unwrap();
        dispatcher
            .post_event(Event::key(SRC, KeyEvent::released(KeyCode::WINDOWS, None)))
            .unwrap();
        dispatcher.post_event(a()).unwrap();

        dispatcher.flush_queue().unwrap();

        assert!(delivered_key(&toolkit, 1).modifiers.contains(Modifiers::META));
        assert!(!delivered_key(&toolkit, 3).modifiers.contains(Modifiers::META));
        assert!(!dispatcher.is_meta_latched());
    }

    #[test]
    fn test_app_deactivation_clears_meta_latch() {
        let (toolkit, dispatcher) = harness();
        dispatcher
            .post_event(Event::key(SRC, KeyEvent::pressed(KeyCode::WINDOWS, None)))
            .unwrap();
        dispatcher
            .post_event(Event::window(SRC, WindowEvent::new(WindowPhase::Deactivated)))
            .unwrap();
        dispatcher.flush_queue().unwrap();
        assert!(dispatcher.is_meta_latched());
        assert!(!dispatcher.is_app_active());

        dispatcher
            .post_event(Event::key(SRC, KeyEvent::pressed(KeyCode::A, Some('a'))))
            .unwrap();
        dispatcher.flush_queue().unwrap();

        assert!(!dispatcher.is_meta_latched());
        assert!(!delivered_key(&toolkit, 2).modifiers.contains(Modifiers::META));
    }

    #[test]
    fn test_layout_fix_when_enabled() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let dispatcher = builder(&toolkit)
            .config(DispatchConfig {
                fix_keyboard_layout: true,
                ..DispatchConfig::headless()
            })
            .build();
        let event = Event::key(SRC, KeyEvent::pressed(KeyCode::SEMICOLON, Some('z')));
        let id = event.id();
        dispatcher.post_event(event).unwrap();

        dispatcher.flush_queue().unwrap();

        let delivered = toolkit.delivered();
        assert_eq!(delivered[0].id(), id, "rewrite keeps identity");
        assert_eq!(delivered[0].as_key().unwrap().code, KeyCode::Z);
    }

    #[test]
    fn test_extended_button_becomes_wheel() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let dispatcher = builder(&toolkit)
            .config(DispatchConfig {
                raw_extended_mouse_buttons: true,
                ..DispatchConfig::headless()
            })
            .build();
        dispatcher
            .post_event(Event::mouse(SRC, MouseEvent::pressed(5, 3, 4)))
            .unwrap();

        dispatcher.flush_queue().unwrap();

        match toolkit.delivered()[0].kind() {
            EventKind::Wheel(wheel) => {
                assert!(wheel.horizontal);
                assert_eq!(wheel.rotation, 1);
            }
            other => panic!("expected wheel, got {}", other.name()),
        }
    }

    struct SwapSource;

    impl PlatformQuirks for SwapSource {
        fn adjust(&self, event: Event) -> Event {
            match event.as_key() {
                Some(key) if key.ch == Some('q') => {
                    let kind = EventKind::Key(KeyEvent::typed('Q'));
                    event.rewrite(kind)
                }
                _ => event,
            }
        }
    }

    #[test]
    fn test_platform_quirks_run_after_normalization() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let dispatcher = builder(&toolkit)
            .platform_quirks(Arc::new(SwapSource))
            .build();
        dispatcher.post_event(typed('q')).unwrap();

        dispatcher.flush_queue().unwrap();

        assert_eq!(delivered_key(&toolkit, 0).ch, Some('Q'));
    }
}

// =============================================================================
// Failure Isolation Tests
// =============================================================================

mod failures {
    use super::*;

    #[test]
    fn test_toolkit_delivery_error_reported_and_loop_continues() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let report = Arc::new(InMemoryReportSink::new());
        let dispatcher = builder(&toolkit).report_sink(report.clone()).build();
        toolkit.set_handler(|event| {
            if event.as_key().is_some_and(|k| k.ch == Some('x')) {
                anyhow::bail!("target window vanished");
            }
            Ok(())
        });

        dispatcher.post_event(typed('x')).unwrap();
        dispatcher.post_event(typed('y')).unwrap();
        dispatcher.flush_queue().unwrap();

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Route);
        assert!(failures[0].cause.contains("target window vanished"));
        assert_eq!(toolkit.delivered().len(), 2);
        assert_eq!(dispatcher.key_event_counts(), (2, 2));
    }

    #[test]
    fn test_panicking_toolkit_handler_still_runs_post_chain() {
        let toolkit = Arc::new(InMemoryToolkit::new());
        let report = Arc::new(InMemoryReportSink::new());
        let dispatcher = builder(&toolkit).report_sink(report.clone()).build();
        toolkit.set_handler(|_| panic!("toolkit bug"));
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            dispatcher.add_post_dispatch_interceptor(
                move |_: &mut Event| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    false
                },
                None,
            );
        }

        dispatcher.post_event(typed('a')).unwrap();
        dispatcher.flush_queue().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(report.stages(), vec![Stage::Route]);
        assert!(report.failures()[0].cause.contains("toolkit bug"));
    }
}
