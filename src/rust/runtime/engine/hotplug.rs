// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal,
    runtime::{
        context,
        engine::Engine,
        fail::Fail,
        fallback::FallbackThread,
        limits::MAX_UNITS,
        tasklet::{
            list::TaskletList,
            TaskletPriority,
        },
        unit::{
            Unit,
            UnitId,
        },
    },
};
use ::std::{
    mem,
    sync::{
        Arc,
        PoisonError,
    },
};

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    /// Brings `id` online with empty lists and a fresh fallback thread.
    pub fn unit_online(&self, id: UnitId) -> Result<(), Fail> {
        if context::in_interrupt() {
            let cause: String = format!(
                "cannot bring a unit online from interrupt context (unit={:?}, preempt_count={:#010x})",
                id,
                context::preempt_count()
            );
            error!("unit_online(): {}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }
        let index: usize = usize::from(id);
        if index >= MAX_UNITS {
            let cause: String = format!("unit out of range (unit={:?}, max={:?})", id, MAX_UNITS);
            error!("unit_online(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let _hotplug = self.hotplug.lock().unwrap_or_else(PoisonError::into_inner);
        if self.unit(id).is_some() {
            let cause: String = format!("unit is already online (unit={:?})", id);
            error!("unit_online(): {}", cause);
            return Err(Fail::new(libc::EEXIST, &cause));
        }

        let unit: Arc<Unit> = Arc::new(Unit::new(id));
        let cpu: Option<usize> = if self.config.pin_fallback_threads {
            Some(index % pal::available_cpus())
        } else {
            None
        };
        unit.install_fallback(FallbackThread::spawn(self.this.clone(), unit.clone(), cpu)?);

        {
            let mut units = self.write_units();
            if units.len() <= index {
                units.resize_with(index + 1, || None);
            }
            units[index] = Some(unit);
        }
        info!("unit_online(): unit={:?}", id);
        Ok(())
    }

    /// Takes `id` offline. Its queued tasklets and pending work move to the lowest-numbered unit that stays online.
    pub fn unit_offline(&self, id: UnitId) -> Result<(), Fail> {
        if context::in_interrupt() {
            let cause: String = format!(
                "cannot take a unit offline from interrupt context (unit={:?}, preempt_count={:#010x})",
                id,
                context::preempt_count()
            );
            error!("unit_offline(): {}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }

        let _hotplug = self.hotplug.lock().unwrap_or_else(PoisonError::into_inner);
        let departing: Arc<Unit> = self.lookup("unit_offline", id)?;
        let survivor: Arc<Unit> = match self
            .read_units()
            .iter()
            .flatten()
            .find(|unit: &&Arc<Unit>| unit.id() != id)
            .cloned()
        {
            Some(survivor) => survivor,
            None => {
                let cause: String = format!("cannot take the last unit offline (unit={:?})", id);
                error!("unit_offline(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            },
        };

        if let Some(fallback) = departing.retire_fallback() {
            fallback.retire();
        }

        // Wait for any in-flight invocation of the execution loop before taking the unit's work away.
        let serving = departing.serve();
        let (mut lists, pending): ([TaskletList; 2], u32) = {
            let mut local = departing.local_irq_disable();
            local.online = false;
            (mem::take(&mut local.tasklets), local.pending.take())
        };
        drop(serving);

        let mut migrated: usize = 0;
        {
            let mut local = survivor.local_irq_disable();
            for priority in [TaskletPriority::High, TaskletPriority::Normal] {
                let list: TaskletList = lists[priority.index()].take();
                if !list.is_empty() {
                    migrated += list.len();
                    local.tasklets[priority.index()].append(list);
                    local.pending.raise(priority.kind());
                }
            }
            local.pending.merge(pending);
        }

        if let Some(slot) = self.write_units().get_mut(usize::from(id)) {
            *slot = None;
        }
        survivor.wake_fallback();

        info!(
            "unit_offline(): unit={:?}, survivor={:?}, tasklets={:?}, pending={:#010x}",
            id,
            survivor.id(),
            migrated,
            pending
        );
        Ok(())
    }
}
