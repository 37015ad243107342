// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Deferred-execution engine.
//!
//! Producers raise work kinds or schedule tasklets on the unit their thread is bound to. The work is then run by the
//! execution loop at the next reentry point: the end of a simulated hard interrupt, the end of the outermost
//! bottom-half-disabled region, or an explicit [Engine::drain]. Whatever the inline loop cannot finish within its
//! budget is handed to the unit's fallback thread.

mod execute;
mod hotplug;
mod tasklet;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    action::{
        Action,
        ActionTable,
        Dispatch,
        SoftirqKind,
    },
    config::{
        Config,
        EngineConfig,
    },
    context::{
        self,
        GuardWeight,
        UnitBinding,
    },
    fail::Fail,
    logging,
    tasklet::TaskletPriority,
    unit::{
        Unit,
        UnitId,
        UnitStats,
    },
};
use ::std::{
    marker::PhantomData,
    ops::Deref,
    sync::{
        Arc,
        Mutex,
        RwLock,
        Weak,
    },
};

pub use self::execute::Budget;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Deferred-execution engine. Always lives behind a [SharedEngine].
pub struct Engine {
    this: Weak<Engine>,
    config: EngineConfig,
    actions: ActionTable,
    /// Online units, indexed by identifier.
    units: RwLock<Vec<Option<Arc<Unit>>>>,
    /// Serializes unit online and offline transitions.
    hotplug: Mutex<()>,
}

/// Reference-counted handle to an [Engine].
#[derive(Clone)]
pub struct SharedEngine(Arc<Engine>);

/// Bottom-half-disabled region. Pending work that became runnable inside the region runs when it is dropped.
pub struct BhDisabled<'a> {
    engine: &'a Engine,
    // Regions are tracked per thread.
    _not_send: PhantomData<*const ()>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedEngine {
    /// Builds an engine and brings units `0..config.units` online.
    pub fn new(config: EngineConfig) -> Result<Self, Fail> {
        logging::initialize();
        config.validate()?;

        let engine: Arc<Engine> = Arc::new_cyclic(|this: &Weak<Engine>| Engine {
            this: this.clone(),
            actions: ActionTable::new(config.nr_kinds),
            config: config.clone(),
            units: RwLock::new(Vec::new()),
            hotplug: Mutex::new(()),
        });

        engine.register(SoftirqKind::HI, |dispatch: &Dispatch<'_>| {
            dispatch
                .engine()
                .tasklet_action(dispatch.target(), TaskletPriority::High)
        })?;
        engine.register(SoftirqKind::TASKLET, |dispatch: &Dispatch<'_>| {
            dispatch
                .engine()
                .tasklet_action(dispatch.target(), TaskletPriority::Normal)
        })?;

        for id in 0..config.units {
            engine.unit_online(UnitId::from(id))?;
        }
        debug!("new(): config={:?}", config);

        Ok(Self(engine))
    }

    /// Builds an engine from a configuration file.
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        Self::new(config.engine_config()?)
    }
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Binds the calling thread to `unit`. The binding lasts until the returned handle is dropped.
    pub fn bind(&self, unit: UnitId) -> Result<UnitBinding, Fail> {
        if self.unit(unit).is_none() {
            let cause: String = format!("unit is not online (unit={:?})", unit);
            error!("bind(): {}", cause);
            return Err(Fail::new(libc::ENODEV, &cause));
        }
        context::bind(self.this.clone(), unit)
    }

    /// Unit the calling thread is bound to, if it is bound to this engine.
    pub fn current_unit(&self) -> Option<UnitId> {
        context::current()
            .filter(|binding: &context::Binding| binding.engine.ptr_eq(&self.this))
            .map(|binding: context::Binding| binding.unit)
    }

    /// Installs the handler of `kind`. Only meant to be called while setting up.
    pub fn register<A: Action + 'static>(&self, kind: SoftirqKind, action: A) -> Result<(), Fail> {
        self.actions.register(kind, Box::new(action))
    }

    /// Marks `kind` as pending on the current unit. Never blocks on the execution loop, so it may be called from
    /// any context.
    pub fn raise(&self, kind: SoftirqKind) -> Result<(), Fail> {
        if kind.ordinal() >= self.actions.nr_kinds() {
            let cause: String = format!(
                "work kind is not configured (kind={:?}, nr_kinds={:?})",
                kind,
                self.actions.nr_kinds()
            );
            error!("raise(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let unit: Arc<Unit> = self.this_unit("raise")?;

        {
            let mut local = unit.local_irq_disable();
            if !local.online {
                let cause: String = format!("unit went offline (unit={:?})", unit.id());
                error!("raise(): {}", cause);
                return Err(Fail::new(libc::ENODEV, &cause));
            }
            local.pending.raise(kind);
        }
        trace!("raise(): unit={:?}, kind={:?}", unit.id(), kind);

        // Nothing on this thread is going to reach the execution loop soon.
        if !context::in_interrupt() {
            unit.wake_fallback();
        }
        Ok(())
    }

    /// Raw pending vector of the current unit.
    pub fn local_pending(&self) -> Result<u32, Fail> {
        Ok(self.this_unit("local_pending")?.pending())
    }

    /// Runs the execution loop on the current unit until no work is pending or the rest was handed off to the
    /// fallback thread. Waits for the loop to be released if another thread is running it.
    pub fn drain(&self) -> Result<(), Fail> {
        if context::in_interrupt() {
            let cause: String = format!(
                "cannot drain from interrupt context (preempt_count={:#010x})",
                context::preempt_count()
            );
            error!("drain(): {}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }
        let unit: Arc<Unit> = self.this_unit("drain")?;

        let serving = unit.serve();
        if !unit.has_pending() {
            return Ok(());
        }
        self.execute(&unit, serving, Budget::Inline);
        Ok(())
    }

    /// Enters a bottom-half-disabled region.
    pub fn local_bh_disable(&self) {
        context::enter_guard(GuardWeight::Disable);
    }

    /// Leaves a bottom-half-disabled region. Leaving the outermost region runs pending work inline.
    pub fn local_bh_enable(&self) {
        if context::in_hardirq() {
            warn!(
                "local_bh_enable(): called from hard interrupt context (preempt_count={:#010x})",
                context::preempt_count()
            );
        }
        context::exit_guard(GuardWeight::Disable);
        if !context::in_interrupt() {
            self.invoke_softirq();
        }
    }

    /// Same as [Engine::local_bh_disable], but the region ends when the returned guard is dropped.
    pub fn bh_disable(&self) -> BhDisabled<'_> {
        self.local_bh_disable();
        BhDisabled {
            engine: self,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` as a hard interrupt on the current unit. Work that became pending runs on the way out.
    pub fn hardirq<R, F: FnOnce() -> R>(&self, f: F) -> R {
        context::enter_guard(GuardWeight::Hardirq);
        let result: R = f();
        context::exit_guard(GuardWeight::Hardirq);
        if !context::in_interrupt() {
            self.invoke_softirq();
        }
        result
    }

    /// Asks the execution loop of `unit` to hand off to its fallback thread at the end of the current pass.
    pub fn set_need_resched(&self, unit: UnitId) -> Result<(), Fail> {
        self.lookup("set_need_resched", unit)?.set_need_resched();
        Ok(())
    }

    pub fn stats(&self, unit: UnitId) -> Result<UnitStats, Fail> {
        Ok(self.lookup("stats", unit)?.stats())
    }

    /// Identifiers of the units that are online, in ascending order.
    pub fn online_units(&self) -> Vec<UnitId> {
        self.read_units()
            .iter()
            .flatten()
            .map(|unit: &Arc<Unit>| unit.id())
            .collect()
    }

    /// Whether the fallback thread of `unit` is currently awake.
    pub fn is_fallback_running(&self, unit: UnitId) -> Result<bool, Fail> {
        Ok(self.lookup("is_fallback_running", unit)?.is_fallback_running())
    }

    /// Runs pending work of the current unit on the way out of a guarded region, unless somebody else is already on it.
    fn invoke_softirq(&self) {
        let unit: Arc<Unit> = match self.current_unit().and_then(|id: UnitId| self.unit(id)) {
            Some(unit) => unit,
            None => return,
        };
        if unit.is_fallback_running() || !unit.has_pending() {
            return;
        }
        match unit.try_serve() {
            Some(serving) => {
                if unit.has_pending() {
                    self.execute(&unit, serving, Budget::Inline);
                }
            },
            None => unit.wake_fallback(),
        };
    }

    pub(crate) fn unit(&self, id: UnitId) -> Option<Arc<Unit>> {
        self.read_units().get(usize::from(id)).cloned().flatten()
    }

    /// Resolves the unit of the calling thread.
    fn this_unit(&self, caller: &str) -> Result<Arc<Unit>, Fail> {
        match self.current_unit() {
            Some(id) => self.lookup(caller, id),
            None => {
                let cause: String = "thread is not bound to this engine".to_string();
                error!("{}(): {}", caller, cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    fn lookup(&self, caller: &str, id: UnitId) -> Result<Arc<Unit>, Fail> {
        match self.unit(id) {
            Some(unit) => Ok(unit),
            None => {
                let cause: String = format!("unit is not online (unit={:?})", id);
                error!("{}(): {}", caller, cause);
                Err(Fail::new(libc::ENODEV, &cause))
            },
        }
    }

    fn read_units(&self) -> ::std::sync::RwLockReadGuard<'_, Vec<Option<Arc<Unit>>>> {
        self.units.read().unwrap_or_else(::std::sync::PoisonError::into_inner)
    }

    fn write_units(&self) -> ::std::sync::RwLockWriteGuard<'_, Vec<Option<Arc<Unit>>>> {
        self.units.write().unwrap_or_else(::std::sync::PoisonError::into_inner)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let units: Vec<Arc<Unit>> = self.write_units().drain(..).flatten().collect();
        for unit in units {
            if let Some(fallback) = unit.retire_fallback() {
                fallback.retire();
            }
        }
    }
}

impl Drop for BhDisabled<'_> {
    fn drop(&mut self) {
        self.engine.local_bh_enable();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
