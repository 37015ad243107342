// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tasklets: individually schedulable units of deferred work that never run on two units at the same time.
//!
//! A tasklet carries two state bits. [TASKLET_STATE_SCHED] is set while the tasklet sits in a unit's list and sponsors
//! exactly one future run. [TASKLET_STATE_RUN] is taken with an atomic test-and-set right before the callback runs, and
//! released by the same dispatch once it returns. Scheduling and dispatching live on the engine (see
//! `engine::tasklet`); this module only holds the per-tasklet protocol.

pub mod list;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    action::SoftirqKind,
    context,
    fail::Fail,
};
use ::std::{
    fmt,
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
        Condvar,
        Mutex,
        PoisonError,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Scheduled for execution.
pub const TASKLET_STATE_SCHED: u32 = 1 << 0;
/// Running on some unit.
pub const TASKLET_STATE_RUN: u32 = 1 << 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Which of the two reserved work kinds drives a scheduled tasklet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskletPriority {
    High,
    Normal,
}

/// Callback of a tasklet. It receives the tasklet it belongs to.
pub type TaskletCallback = Box<dyn Fn(&Tasklet) + Send + Sync>;

/// Handle to a tasklet. Clones refer to the same tasklet.
#[derive(Clone)]
pub struct Tasklet(Arc<TaskletInner>);

struct TaskletInner {
    name: String,
    state: AtomicU32,
    /// Zero means runnable.
    count: AtomicU32,
    callback: TaskletCallback,
    /// Waiters for SCHED or RUN to clear.
    quiesce: Mutex<()>,
    quiesced: Condvar,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TaskletPriority {
    /// Work kind raised when a tasklet of this priority is scheduled.
    pub fn kind(&self) -> SoftirqKind {
        match self {
            TaskletPriority::High => SoftirqKind::HI,
            TaskletPriority::Normal => SoftirqKind::TASKLET,
        }
    }

    /// Index of the per-unit list holding tasklets of this priority.
    pub fn index(&self) -> usize {
        match self {
            TaskletPriority::High => 0,
            TaskletPriority::Normal => 1,
        }
    }
}

impl Tasklet {
    /// Creates a runnable, unscheduled tasklet.
    pub fn new<F>(name: &str, callback: F) -> Self
    where
        F: Fn(&Tasklet) + Send + Sync + 'static,
    {
        Self(Arc::new(TaskletInner {
            name: name.to_string(),
            state: AtomicU32::new(0),
            count: AtomicU32::new(0),
            callback: Box::new(callback),
            quiesce: Mutex::new(()),
            quiesced: Condvar::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_scheduled(&self) -> bool {
        self.0.state.load(Ordering::Acquire) & TASKLET_STATE_SCHED != 0
    }

    pub fn is_running(&self) -> bool {
        self.0.state.load(Ordering::Acquire) & TASKLET_STATE_RUN != 0
    }

    pub fn disable_count(&self) -> u32 {
        self.0.count.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.disable_count() == 0
    }

    /// Schedules the tasklet on the unit the calling thread is bound to.
    pub fn schedule(&self) -> Result<(), Fail> {
        self.schedule_with(TaskletPriority::Normal)
    }

    /// Same as [Tasklet::schedule], but on the high priority list.
    pub fn hi_schedule(&self) -> Result<(), Fail> {
        self.schedule_with(TaskletPriority::High)
    }

    fn schedule_with(&self, priority: TaskletPriority) -> Result<(), Fail> {
        let engine = match context::current().and_then(|binding: context::Binding| binding.engine.upgrade()) {
            Some(engine) => engine,
            None => {
                let cause: String = format!("thread is not bound to a live engine (tasklet={:?})", self.name());
                error!("schedule(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        engine.schedule_tasklet(self, priority)
    }

    /// Suspends the tasklet without waiting for a running invocation to finish.
    pub fn disable_nosync(&self) {
        self.0.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Suspends the tasklet and waits until it is no longer running. Must not be called from the tasklet's own
    /// callback.
    pub fn disable(&self) {
        self.disable_nosync();
        self.unlock_wait();
    }

    /// Undoes one [Tasklet::disable]. Enabling a tasklet that is not disabled is reported and ignored.
    pub fn enable(&self) {
        let decremented = self
            .0
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count: u32| count.checked_sub(1));
        if decremented.is_err() {
            error!("enable(): tasklet is not disabled (tasklet={:?})", self.name());
        }
    }

    /// Waits until the tasklet is neither scheduled nor running and leaves it unscheduled. A running invocation is
    /// waited for, not cancelled. Must not be called from interrupt context.
    pub fn kill(&self) -> Result<(), Fail> {
        if context::in_interrupt() {
            let cause: String = format!(
                "cannot tear down a tasklet from interrupt context (tasklet={:?}, preempt_count={:#010x})",
                self.name(),
                context::preempt_count()
            );
            error!("kill(): {}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }

        // Claim SCHED so that nobody can queue the tasklet again while we wait.
        while self.test_and_set_sched() {
            self.wait_until_clear(TASKLET_STATE_SCHED);
        }
        self.unlock_wait();
        self.0.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel);
        self.notify();
        trace!("kill(): tasklet={:?}", self.name());
        Ok(())
    }

    /// Waits until the tasklet is not running anywhere.
    pub fn unlock_wait(&self) {
        self.wait_until_clear(TASKLET_STATE_RUN);
    }

    /// Sets SCHED. Returns whether it was already set.
    pub(crate) fn test_and_set_sched(&self) -> bool {
        self.0.state.fetch_or(TASKLET_STATE_SCHED, Ordering::AcqRel) & TASKLET_STATE_SCHED != 0
    }

    /// Clears SCHED. Returns whether it was set.
    pub(crate) fn clear_sched(&self) -> bool {
        let was_set: bool = self.0.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel) & TASKLET_STATE_SCHED != 0;
        self.notify();
        was_set
    }

    /// Tries to take RUN. Fails if the tasklet is running on some unit.
    pub(crate) fn trylock(&self) -> bool {
        self.0.state.fetch_or(TASKLET_STATE_RUN, Ordering::Acquire) & TASKLET_STATE_RUN == 0
    }

    /// Releases RUN and wakes anyone waiting for the tasklet to quiesce.
    pub(crate) fn unlock(&self) {
        self.0.state.fetch_and(!TASKLET_STATE_RUN, Ordering::Release);
        self.notify();
    }

    pub(crate) fn invoke(&self) {
        (self.0.callback)(self)
    }

    fn wait_until_clear(&self, mask: u32) {
        let mut guard = self.0.quiesce.lock().unwrap_or_else(PoisonError::into_inner);
        while self.0.state.load(Ordering::Acquire) & mask != 0 {
            guard = self.0.quiesced.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn notify(&self) {
        // Taking the lock orders this wakeup after a waiter's check of the state.
        let _guard = self.0.quiesce.lock().unwrap_or_else(PoisonError::into_inner);
        self.0.quiesced.notify_all();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for Tasklet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasklet")
            .field("name", &self.0.name)
            .field("state", &self.0.state.load(Ordering::Relaxed))
            .field("count", &self.0.count.load(Ordering::Relaxed))
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
