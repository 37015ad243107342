// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    context,
    engine::Engine,
    fail::Fail,
    tasklet::{
        list::TaskletList,
        Tasklet,
        TaskletPriority,
    },
    unit::Unit,
};
use ::std::sync::Arc;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    /// Schedules `tasklet` on the current unit. Scheduling a tasklet that is already scheduled does nothing.
    pub fn tasklet_schedule(&self, tasklet: &Tasklet) -> Result<(), Fail> {
        self.schedule_tasklet(tasklet, TaskletPriority::Normal)
    }

    /// Same as [Engine::tasklet_schedule], but on the high priority list.
    pub fn tasklet_hi_schedule(&self, tasklet: &Tasklet) -> Result<(), Fail> {
        self.schedule_tasklet(tasklet, TaskletPriority::High)
    }

    pub fn tasklet_disable(&self, tasklet: &Tasklet) {
        tasklet.disable();
    }

    pub fn tasklet_enable(&self, tasklet: &Tasklet) {
        tasklet.enable();
    }

    /// Waits until `tasklet` is quiescent. Once this returns, the owner may drop its last handle.
    pub fn tasklet_teardown(&self, tasklet: &Tasklet) -> Result<(), Fail> {
        tasklet.kill()
    }

    pub(crate) fn schedule_tasklet(&self, tasklet: &Tasklet, priority: TaskletPriority) -> Result<(), Fail> {
        let unit: Arc<Unit> = self.this_unit("schedule_tasklet")?;
        if tasklet.test_and_set_sched() {
            return Ok(());
        }

        {
            let mut local = unit.local_irq_disable();
            if !local.online {
                drop(local);
                tasklet.clear_sched();
                let cause: String = format!("unit went offline (unit={:?}, tasklet={:?})", unit.id(), tasklet.name());
                error!("schedule_tasklet(): {}", cause);
                return Err(Fail::new(libc::ENODEV, &cause));
            }
            local.tasklets[priority.index()].push_back(tasklet.clone());
            local.pending.raise(priority.kind());
        }
        trace!(
            "schedule_tasklet(): unit={:?}, tasklet={:?}, priority={:?}",
            unit.id(),
            tasklet.name(),
            priority
        );

        if !context::in_interrupt() {
            unit.wake_fallback();
        }
        Ok(())
    }

    /// Handler of the two tasklet kinds.
    pub(crate) fn tasklet_action(&self, unit: &Unit, priority: TaskletPriority) {
        let mut detached: TaskletList = unit.local_irq_disable().tasklets[priority.index()].take();

        while let Some(tasklet) = detached.pop_front() {
            if tasklet.trylock() {
                if tasklet.is_enabled() {
                    if !tasklet.clear_sched() {
                        error!(
                            "tasklet_action(): queued tasklet is not scheduled (unit={:?}, tasklet={:?})",
                            unit.id(),
                            tasklet.name()
                        );
                        tasklet.unlock();
                        continue;
                    }
                    tasklet.invoke();
                    tasklet.unlock();
                    continue;
                }
                tasklet.unlock();
            }

            // Running elsewhere or disabled: retry on a later pass.
            let mut local = unit.local_irq_disable();
            local.tasklets[priority.index()].push_back(tasklet);
            local.pending.raise(priority.kind());
        }
    }
}
