// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    action::{
        Dispatch,
        SoftirqKind,
    },
    context::{
        self,
        GuardWeight,
    },
    engine::Engine,
    pending::PendingVector,
    unit::Unit,
};
use ::std::{
    sync::MutexGuard,
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// How long one invocation of the execution loop may keep going.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Budget {
    /// Restart while work is pending, up to the configured pass and time ceilings. Leftover work is handed to the
    /// fallback thread.
    Inline,
    /// Exactly one pass. Used by the fallback thread, which yields between passes instead.
    SinglePass,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    /// Runs the execution loop of `unit`. The caller must have taken ownership of the loop through `serving`.
    pub(super) fn execute(&self, unit: &Unit, serving: MutexGuard<'_, ()>, budget: Budget) {
        let start: Instant = Instant::now();
        let mut passes: usize = 0;
        let handoff: bool;

        context::enter_guard(GuardWeight::Serving);
        loop {
            let pending: u32 = unit.local_irq_disable().pending.take();
            passes += 1;

            for kind in PendingVector::kinds(pending) {
                self.dispatch(unit, kind);
            }

            if !unit.has_pending() {
                handoff = false;
                break;
            }
            match budget {
                Budget::SinglePass => {
                    handoff = false;
                    break;
                },
                Budget::Inline => {
                    if passes < self.config.max_restart
                        && start.elapsed() < self.config.max_time
                        && !unit.need_resched()
                    {
                        continue;
                    }
                    handoff = true;
                    break;
                },
            }
        }
        context::exit_guard(GuardWeight::Serving);

        unit.record_invocation(passes, handoff);
        // Leaving the loop meets any pending scheduling demand.
        unit.take_need_resched();
        drop(serving);

        if budget == Budget::Inline {
            if handoff {
                debug!(
                    "execute(): handing off to fallback thread (unit={:?}, passes={:?}, elapsed={:?})",
                    unit.id(),
                    passes,
                    start.elapsed()
                );
                unit.wake_fallback();
            } else if unit.has_pending() {
                // Raised after the last check, by a context that counted on us.
                unit.wake_fallback();
            }
        }
    }

    /// Runs a single pass on behalf of the fallback thread of `unit`.
    pub(crate) fn run_fallback_pass(&self, unit: &Unit) {
        let serving = unit.serve();
        if !unit.has_pending() {
            return;
        }
        unit.record_fallback_pass();
        self.execute(unit, serving, Budget::SinglePass);
    }

    fn dispatch(&self, unit: &Unit, kind: SoftirqKind) {
        let Some(action) = self.actions.get(kind) else {
            warn!("dispatch(): no handler registered (unit={:?}, kind={:?})", unit.id(), kind);
            return;
        };

        let before: u32 = context::preempt_count();
        trace!("dispatch(): unit={:?}, kind={:?}", unit.id(), kind);
        action.run(&Dispatch::new(self, unit, kind));
        unit.record_dispatch(kind);

        let after: u32 = context::preempt_count();
        if after != before {
            error!(
                "dispatch(): handler left guard count unbalanced (unit={:?}, kind={:?}, before={:#010x}, after={:#010x})",
                unit.id(),
                kind,
                before,
                after
            );
            context::restore_preempt_count(before);
            unit.record_guard_imbalance();
        }
    }
}
