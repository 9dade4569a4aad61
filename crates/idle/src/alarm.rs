//! Background timer thread.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use switchyard_events::Task;

use crate::scheduler::{Scheduler, TimerId};

/// Receives due tasks from the timer thread.
///
/// The dispatcher wires this to "post an invocation", so timer callbacks run
/// on the dispatch thread rather than on the timer thread.
pub type Executor = Arc<dyn Fn(Task) + Send + Sync>;

enum Command {
    Schedule {
        id: TimerId,
        deadline: Instant,
        task: Task,
    },
    Cancel(TimerId),
    Shutdown,
}

/// A [`Scheduler`] backed by one background thread.
///
/// Cancellation is synchronous: once [`cancel`](Scheduler::cancel) returns
/// `true`, the task is never handed to the executor.
pub struct AlarmScheduler {
    tx: Sender<Command>,
    live: Arc<Mutex<HashSet<TimerId>>>,
    next_id: AtomicU64,
    handle: Option<JoinHandle<()>>,
}

impl AlarmScheduler {
    /// Start the timer thread. Due tasks are passed to `executor`.
    pub fn start(executor: Executor) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let live = Arc::new(Mutex::new(HashSet::new()));
        let handle = {
            let live = Arc::clone(&live);
            thread::Builder::new()
                .name("switchyard-alarm".into())
                .spawn(move || run_alarm_loop(rx, live, executor))
        };
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn alarm thread: {}", e);
                None
            }
        };

        Self {
            tx,
            live,
            next_id: AtomicU64::new(1),
            handle,
        }
    }

    /// Start with an executor that runs tasks directly on the timer thread.
    pub fn inline() -> Self {
        Self::start(Arc::new(|task: Task| task()))
    }

    /// Number of timers scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn run_alarm_loop(rx: Receiver<Command>, live: Arc<Mutex<HashSet<TimerId>>>, executor: Executor) {
    tracing::debug!("Alarm thread started");
    let mut timers: BTreeMap<(Instant, TimerId), Task> = BTreeMap::new();

    loop {
        let next_deadline = timers.keys().next().map(|(deadline, _)| *deadline);
        let received = match next_deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Schedule { id, deadline, task }) => {
                timers.insert((deadline, id), task);
            }
            Ok(Command::Cancel(id)) => {
                timers.retain(|(_, timer), _| *timer != id);
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some(entry) = timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), task) = entry.remove_entry();
            let still_live = live
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            if still_live {
                executor(task);
            }
        }
    }

    tracing::debug!(dropped = timers.len(), "Alarm thread stopped");
}

impl Scheduler for AlarmScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        let Some(deadline) = Instant::now().checked_add(delay) else {
            tracing::warn!(timer = %id, ?delay, "Timer delay out of range, timer will not fire");
            return id;
        };
        let command = Command::Schedule { id, deadline, task };
        if self.tx.send(command).is_err() {
            tracing::warn!(timer = %id, "Alarm thread is gone, timer will not fire");
        }
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let was_live = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if was_live {
            let _ = self.tx.send(Command::Cancel(id));
        }
        was_live
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Drop for AlarmScheduler {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            // A task running on the timer thread may hold the last handle.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
