// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Per-unit state. Each execution unit owns its pending vector and tasklet lists outright; they are only touched while
//! the unit's local state is locked, which stands in for running with local interrupts disabled.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    action::SoftirqKind,
    fallback::FallbackThread,
    limits::MAX_SOFTIRQ_KINDS,
    pending::PendingVector,
    tasklet::list::TaskletList,
};
use ::std::{
    fmt,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            AtomicUsize,
            Ordering,
        },
        Mutex,
        MutexGuard,
        PoisonError,
        TryLockError,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Execution unit identifier.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct UnitId(usize);

/// State that may only be accessed with the unit's local lock held.
pub struct LocalState {
    pub pending: PendingVector,
    /// Tasklet lists, indexed by [crate::runtime::tasklet::TaskletPriority::index].
    pub tasklets: [TaskletList; 2],
    /// Cleared once the unit's work has been migrated away.
    pub online: bool,
}

/// Snapshot of a unit's counters.
#[derive(Clone, Debug, Default)]
pub struct UnitStats {
    /// Handler invocations per work kind.
    pub dispatched: [u64; MAX_SOFTIRQ_KINDS],
    /// Times the execution loop was entered.
    pub invocations: u64,
    /// Passes made beyond the first one of each invocation.
    pub restarts: u64,
    /// Inline invocations that left work behind for the fallback thread.
    pub handoffs: u64,
    /// Largest number of passes made by one invocation.
    pub max_passes: usize,
    /// Handlers that returned with an unbalanced guard count.
    pub guard_imbalances: u64,
    pub fallback_wakeups: u64,
    pub fallback_passes: u64,
}

struct UnitCounters {
    dispatched: [AtomicU64; MAX_SOFTIRQ_KINDS],
    invocations: AtomicU64,
    restarts: AtomicU64,
    handoffs: AtomicU64,
    max_passes: AtomicUsize,
    guard_imbalances: AtomicU64,
    fallback_wakeups: AtomicU64,
    fallback_passes: AtomicU64,
}

/// Execution unit.
pub struct Unit {
    id: UnitId,
    local: Mutex<LocalState>,
    /// Held by whoever runs the execution loop for this unit.
    serving: Mutex<()>,
    fallback: Mutex<Option<FallbackThread>>,
    /// Set from the moment the fallback thread is woken until it parks again.
    fallback_running: AtomicBool,
    need_resched: AtomicBool,
    counters: UnitCounters,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl UnitStats {
    pub fn dispatched(&self, kind: SoftirqKind) -> u64 {
        self.dispatched.get(kind.ordinal()).copied().unwrap_or(0)
    }
}

impl UnitCounters {
    fn new() -> Self {
        Self {
            dispatched: ::std::array::from_fn(|_| AtomicU64::new(0)),
            invocations: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            handoffs: AtomicU64::new(0),
            max_passes: AtomicUsize::new(0),
            guard_imbalances: AtomicU64::new(0),
            fallback_wakeups: AtomicU64::new(0),
            fallback_passes: AtomicU64::new(0),
        }
    }
}

impl Unit {
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            local: Mutex::new(LocalState {
                pending: PendingVector::default(),
                tasklets: [TaskletList::default(), TaskletList::default()],
                online: true,
            }),
            serving: Mutex::new(()),
            fallback: Mutex::new(None),
            fallback_running: AtomicBool::new(false),
            need_resched: AtomicBool::new(false),
            counters: UnitCounters::new(),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Locks the unit's local state. Never call back into user code while the returned guard is alive.
    pub fn local_irq_disable(&self) -> MutexGuard<'_, LocalState> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_pending(&self) -> bool {
        !self.local_irq_disable().pending.is_empty()
    }

    pub fn pending(&self) -> u32 {
        self.local_irq_disable().pending.load()
    }

    /// Blocks until the calling thread owns the execution loop of this unit.
    pub fn serve(&self) -> MutexGuard<'_, ()> {
        self.serving.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes ownership of the execution loop of this unit if nobody else holds it.
    pub fn try_serve(&self) -> Option<MutexGuard<'_, ()>> {
        match self.serving.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn install_fallback(&self, fallback: FallbackThread) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(fallback);
    }

    pub fn retire_fallback(&self) -> Option<FallbackThread> {
        self.fallback.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Wakes the fallback thread of this unit. Wakeups coalesce.
    pub fn wake_fallback(&self) {
        let fallback = self.fallback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fallback) = fallback.as_ref() {
            self.fallback_running.store(true, Ordering::Release);
            if fallback.wake() {
                self.counters.fallback_wakeups.fetch_add(1, Ordering::Relaxed);
                trace!("wake_fallback(): unit={:?}", self.id);
            }
        }
    }

    pub fn is_fallback_running(&self) -> bool {
        self.fallback_running.load(Ordering::Acquire)
    }

    pub fn set_fallback_running(&self, running: bool) {
        self.fallback_running.store(running, Ordering::Release);
    }

    pub fn set_need_resched(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    pub fn take_need_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::AcqRel)
    }

    pub fn record_dispatch(&self, kind: SoftirqKind) {
        if let Some(counter) = self.counters.dispatched.get(kind.ordinal()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_invocation(&self, passes: usize, handoff: bool) {
        self.counters.invocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .restarts
            .fetch_add(passes.saturating_sub(1) as u64, Ordering::Relaxed);
        self.counters.max_passes.fetch_max(passes, Ordering::Relaxed);
        if handoff {
            self.counters.handoffs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_guard_imbalance(&self) {
        self.counters.guard_imbalances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_pass(&self) {
        self.counters.fallback_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> UnitStats {
        let counters: &UnitCounters = &self.counters;
        UnitStats {
            dispatched: ::std::array::from_fn(|i| counters.dispatched[i].load(Ordering::Relaxed)),
            invocations: counters.invocations.load(Ordering::Relaxed),
            restarts: counters.restarts.load(Ordering::Relaxed),
            handoffs: counters.handoffs.load(Ordering::Relaxed),
            max_passes: counters.max_passes.load(Ordering::Relaxed),
            guard_imbalances: counters.guard_imbalances.load(Ordering::Relaxed),
            fallback_wakeups: counters.fallback_wakeups.load(Ordering::Relaxed),
            fallback_passes: counters.fallback_passes.load(Ordering::Relaxed),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit{}", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for UnitId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<UnitId> for usize {
    fn from(value: UnitId) -> Self {
        value.0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
