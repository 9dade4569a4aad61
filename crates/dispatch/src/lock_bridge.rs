//! Decides whether a delivery runs under write intent, and runs it.

use std::collections::HashSet;
use std::sync::OnceLock;

use switchyard_events::{Event, InvocationTag};
use switchyard_lock::IntentLockRef;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    WriteIntent,
    Bare,
}

/// Pure classification of events into locked and bare delivery.
///
/// Everything needs write intent by default. Invocations whose tag is on the
/// unlocked list are delivered bare, unless the tag is also on the locked
/// list, which is checked first.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    unlocked: HashSet<InvocationTag>,
    locked: HashSet<InvocationTag>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl LockPolicy {
    pub fn new(
        unlocked: impl IntoIterator<Item = InvocationTag>,
        locked: impl IntoIterator<Item = InvocationTag>,
    ) -> Self {
        Self {
            unlocked: unlocked.into_iter().collect(),
            locked: locked.into_iter().collect(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.unlocked_invocations.iter().cloned(),
            config.locked_invocations.iter().cloned(),
        )
    }

    pub fn classify(&self, event: &Event) -> LockMode {
        let Some(invocation) = event.as_invocation() else {
            return LockMode::WriteIntent;
        };
        let tag = invocation.tag();
        if self.locked.contains(tag) {
            LockMode::WriteIntent
        } else if self.unlocked.contains(tag) {
            LockMode::Bare
        } else {
            LockMode::WriteIntent
        }
    }
}

/// Bridge between the dispatch loop and the process intent lock.
///
/// Until a lock manager is installed (early boot) every delivery is bare.
pub struct LockBridge {
    policy: LockPolicy,
    manager: OnceLock<IntentLockRef>,
}

impl LockBridge {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            policy,
            manager: OnceLock::new(),
        }
    }

    pub fn with_manager(policy: LockPolicy, manager: IntentLockRef) -> Self {
        Self {
            policy,
            manager: OnceLock::from(manager),
        }
    }

    /// Install the lock manager. Only one install is allowed.
    pub fn install(&self, manager: IntentLockRef) -> Result<()> {
        self.manager
            .set(manager)
            .map_err(|_| DispatchError::LockManagerInstalled)
    }

    pub fn is_installed(&self) -> bool {
        self.manager.get().is_some()
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    pub fn classify(&self, event: &Event) -> LockMode {
        self.policy.classify(event)
    }

    /// Run `task` in the given mode. Write intent falls back to bare
    /// delivery while no manager is installed.
    pub fn run(&self, mode: LockMode, task: &mut dyn FnMut()) {
        match (mode, self.manager.get()) {
            (LockMode::WriteIntent, Some(manager)) => manager.run_under_write_intent(task),
            (LockMode::WriteIntent, None) => {
                tracing::trace!("No lock manager yet, delivering bare");
                task();
            }
            (LockMode::Bare, _) => task(),
        }
    }

    /// Run `task` with write intent released, if a manager is installed.
    pub fn run_unlocking(&self, task: &mut dyn FnMut()) {
        match self.manager.get() {
            Some(manager) => manager.run_unlocking(task),
            None => task(),
        }
    }
}
