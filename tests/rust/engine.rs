// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use crate::common::{
    new_engine,
    wait_until,
    TIMEOUT,
};
use ::anyhow::Result;
use ::bottomhalf::{
    Config,
    Dispatch,
    EngineConfig,
    SharedEngine,
    SoftirqKind,
    UnitBinding,
    UnitId,
    UnitStats,
};
use ::std::{
    str::FromStr,
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    thread,
    time::Duration,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Registers a handler for `kind` that counts its invocations.
fn register_counter(engine: &SharedEngine, kind: SoftirqKind) -> Result<Arc<AtomicUsize>> {
    let runs: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let counter: Arc<AtomicUsize> = runs.clone();
    if let Err(e) = engine.register(kind, move |_: &Dispatch<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
    }) {
        anyhow::bail!("failed to register handler: {:?}", e);
    }
    Ok(runs)
}

fn bind(engine: &SharedEngine, unit: usize) -> Result<UnitBinding> {
    match engine.bind(UnitId::from(unit)) {
        Ok(binding) => Ok(binding),
        Err(e) => anyhow::bail!("failed to bind: {:?}", e),
    }
}

//==============================================================================
// Draining
//==============================================================================

/// Draining with nothing pending dispatches nothing.
#[test]
fn drain_with_nothing_pending_is_a_no_op() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let runs: Arc<AtomicUsize> = register_counter(&engine, SoftirqKind::NET_TX)?;

    engine.drain()?;
    engine.drain()?;

    let stats: UnitStats = engine.stats(UnitId::from(0))?;
    bottomhalf::ensure_eq!(runs.load(Ordering::SeqCst), 0);
    bottomhalf::ensure_eq!(stats.invocations, 0);
    bottomhalf::ensure_eq!(engine.local_pending()?, 0);
    Ok(())
}

/// A kind raised from a simulated interrupt runs exactly once and its bit is cleared.
#[test]
fn raise_from_interrupt_runs_once() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let kind: SoftirqKind = SoftirqKind::new(3)?;
    let runs: Arc<AtomicUsize> = register_counter(&engine, kind)?;

    engine.hardirq(|| engine.raise(kind))?;
    engine.drain()?;

    bottomhalf::ensure_eq!(runs.load(Ordering::SeqCst), 1);
    bottomhalf::ensure_eq!(engine.local_pending()? & kind.mask(), 0);
    bottomhalf::ensure_eq!(engine.stats(UnitId::from(0))?.dispatched(kind), 1);
    Ok(())
}

/// Draining is forbidden inside a bottom-half-disabled region.
#[test]
fn drain_inside_guarded_region_fails() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;

    let _region = engine.bh_disable();
    match engine.drain() {
        Ok(()) => anyhow::bail!("drain() should fail"),
        Err(e) => bottomhalf::ensure_eq!(e.errno, libc::EPERM),
    }
    Ok(())
}

/// Unbound threads cannot reach the engine.
#[test]
fn unbound_thread_cannot_drain() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    match engine.drain() {
        Ok(()) => anyhow::bail!("drain() should fail"),
        Err(e) => bottomhalf::ensure_eq!(e.errno, libc::EINVAL),
    }
    Ok(())
}

//==============================================================================
// Ordering
//==============================================================================

/// Kinds pending together are dispatched lowest ordinal first.
#[test]
fn kinds_dispatch_in_ascending_order() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let order: Arc<Mutex<Vec<SoftirqKind>>> = Arc::new(Mutex::new(Vec::new()));
    for kind in [SoftirqKind::TIMER, SoftirqKind::NET_TX, SoftirqKind::RCU] {
        let order: Arc<Mutex<Vec<SoftirqKind>>> = order.clone();
        engine.register(kind, move |dispatch: &Dispatch<'_>| {
            if let Ok(mut order) = order.lock() {
                order.push(dispatch.kind());
            }
        })?;
    }

    {
        let _region = engine.bh_disable();
        engine.raise(SoftirqKind::RCU)?;
        engine.raise(SoftirqKind::NET_TX)?;
        engine.raise(SoftirqKind::TIMER)?;
    }

    let order: Vec<SoftirqKind> = match order.lock() {
        Ok(order) => order.clone(),
        Err(_) => anyhow::bail!("order lock poisoned"),
    };
    bottomhalf::ensure_eq!(order, vec![SoftirqKind::TIMER, SoftirqKind::NET_TX, SoftirqKind::RCU]);
    Ok(())
}

/// A pending kind without a handler is skipped and its bit is still consumed.
#[test]
fn kind_without_handler_is_skipped() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;

    engine.hardirq(|| engine.raise(SoftirqKind::BLOCK))?;

    bottomhalf::ensure_eq!(engine.local_pending()?, 0);
    bottomhalf::ensure_eq!(engine.stats(UnitId::from(0))?.dispatched(SoftirqKind::BLOCK), 0);
    Ok(())
}

//==============================================================================
// Budget
//==============================================================================

/// Handlers that keep re-raising their own kind cannot hold the inline loop beyond its pass budget.
#[test]
fn self_raising_handler_is_handed_off() -> Result<()> {
    const MAX_RESTART: usize = 3;
    let engine: SharedEngine = new_engine(1, MAX_RESTART)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let again: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
    let runs: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    {
        let again: Arc<AtomicBool> = again.clone();
        let runs: Arc<AtomicUsize> = runs.clone();
        engine.register(SoftirqKind::TIMER, move |dispatch: &Dispatch<'_>| {
            runs.fetch_add(1, Ordering::SeqCst);
            if again.load(Ordering::SeqCst) {
                if let Err(e) = dispatch.engine().raise(dispatch.kind()) {
                    panic!("raise() failed: {:?}", e);
                }
            }
        })?;
    }

    engine.hardirq(|| engine.raise(SoftirqKind::TIMER))?;

    let stats: UnitStats = engine.stats(UnitId::from(0))?;
    bottomhalf::ensure_neq!(stats.handoffs, 0);
    bottomhalf::ensure_eq!(stats.max_passes <= MAX_RESTART, true);

    // The fallback thread keeps the work going.
    wait_until(TIMEOUT, || match engine.stats(UnitId::from(0)) {
        Ok(stats) => stats.fallback_passes > 0,
        Err(_) => false,
    })?;

    again.store(false, Ordering::SeqCst);
    wait_until(TIMEOUT, || matches!(engine.local_pending(), Ok(0)))?;
    let stats: UnitStats = engine.stats(UnitId::from(0))?;
    bottomhalf::ensure_eq!(stats.max_passes <= MAX_RESTART, true);
    bottomhalf::ensure_eq!(runs.load(Ordering::SeqCst) > MAX_RESTART, true);
    Ok(())
}

/// A scheduling demand makes the inline loop hand off after the current pass.
#[test]
fn need_resched_forces_handoff() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let once: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
    {
        let once: Arc<AtomicBool> = once.clone();
        engine.register(SoftirqKind::SCHED, move |dispatch: &Dispatch<'_>| {
            if once.swap(false, Ordering::SeqCst) {
                if let Err(e) = dispatch.engine().raise(dispatch.kind()) {
                    panic!("raise() failed: {:?}", e);
                }
            }
        })?;
    }

    engine.set_need_resched(UnitId::from(0))?;
    engine.hardirq(|| engine.raise(SoftirqKind::SCHED))?;

    let stats: UnitStats = engine.stats(UnitId::from(0))?;
    bottomhalf::ensure_eq!(stats.handoffs, 1);
    bottomhalf::ensure_eq!(stats.max_passes, 1);
    wait_until(TIMEOUT, || {
        matches!(engine.stats(UnitId::from(0)), Ok(stats) if stats.dispatched(SoftirqKind::SCHED) == 2)
    })?;
    Ok(())
}

/// Slow handlers that keep re-raising their own kind are handed off once the time budget runs out, long before the
/// pass budget does.
#[test]
fn slow_handler_is_handed_off_by_time_budget() -> Result<()> {
    const MAX_RESTART: usize = 1000;
    const MAX_TIME: Duration = Duration::from_millis(2);
    const RUN_TIME: Duration = Duration::from_micros(500);
    let config: EngineConfig = EngineConfig {
        units: 1,
        max_restart: MAX_RESTART,
        max_time: MAX_TIME,
        ..EngineConfig::default()
    };
    let engine: SharedEngine = match SharedEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => anyhow::bail!("failed to create engine: {:?}", e),
    };
    let _binding: UnitBinding = bind(&engine, 0)?;
    let again: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
    {
        let again: Arc<AtomicBool> = again.clone();
        engine.register(SoftirqKind::BLOCK, move |dispatch: &Dispatch<'_>| {
            thread::sleep(RUN_TIME);
            if again.load(Ordering::SeqCst) {
                if let Err(e) = dispatch.engine().raise(dispatch.kind()) {
                    panic!("raise() failed: {:?}", e);
                }
            }
        })?;
    }

    engine.hardirq(|| engine.raise(SoftirqKind::BLOCK))?;

    // Every pass takes at least RUN_TIME, so the loop runs out of time after MAX_TIME / RUN_TIME passes.
    let stats: UnitStats = engine.stats(UnitId::from(0))?;
    bottomhalf::ensure_eq!(stats.handoffs, 1);
    bottomhalf::ensure_eq!(stats.max_passes >= 1, true);
    bottomhalf::ensure_eq!(stats.max_passes <= 4, true);
    bottomhalf::ensure_eq!(stats.max_passes < MAX_RESTART, true);

    again.store(false, Ordering::SeqCst);
    wait_until(TIMEOUT, || matches!(engine.local_pending(), Ok(0)))?;
    Ok(())
}

/// A scheduling demand is met by the invocation that sees it, even when that invocation needs a single pass.
#[test]
fn need_resched_does_not_outlive_invocation() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let timer: Arc<AtomicUsize> = register_counter(&engine, SoftirqKind::TIMER)?;
    let once: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
    {
        let once: Arc<AtomicBool> = once.clone();
        engine.register(SoftirqKind::NET_TX, move |dispatch: &Dispatch<'_>| {
            if once.swap(false, Ordering::SeqCst) {
                if let Err(e) = dispatch.engine().raise(dispatch.kind()) {
                    panic!("raise() failed: {:?}", e);
                }
            }
        })?;
    }

    engine.set_need_resched(UnitId::from(0))?;
    engine.hardirq(|| engine.raise(SoftirqKind::TIMER))?;
    bottomhalf::ensure_eq!(timer.load(Ordering::SeqCst), 1);
    bottomhalf::ensure_eq!(engine.stats(UnitId::from(0))?.handoffs, 0);

    // A later invocation that needs two passes gets both of them inline.
    engine.hardirq(|| engine.raise(SoftirqKind::NET_TX))?;
    let stats: UnitStats = engine.stats(UnitId::from(0))?;
    bottomhalf::ensure_eq!(stats.handoffs, 0);
    bottomhalf::ensure_eq!(stats.max_passes, 2);
    bottomhalf::ensure_eq!(stats.dispatched(SoftirqKind::NET_TX), 2);
    Ok(())
}

//==============================================================================
// Reentrancy Guard
//==============================================================================

/// A handler that leaks a guarded region is reported and the count is corrected.
#[test]
fn guard_imbalance_is_contained() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let runs: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    {
        let runs: Arc<AtomicUsize> = runs.clone();
        engine.register(SoftirqKind::IRQ_POLL, move |dispatch: &Dispatch<'_>| {
            runs.fetch_add(1, Ordering::SeqCst);
            dispatch.engine().local_bh_disable();
        })?;
    }

    engine.hardirq(|| engine.raise(SoftirqKind::IRQ_POLL))?;
    bottomhalf::ensure_eq!(bottomhalf::preempt_count(), 0);
    bottomhalf::ensure_eq!(engine.stats(UnitId::from(0))?.guard_imbalances, 1);

    // The engine keeps working.
    engine.hardirq(|| engine.raise(SoftirqKind::IRQ_POLL))?;
    bottomhalf::ensure_eq!(runs.load(Ordering::SeqCst), 2);
    bottomhalf::ensure_eq!(engine.stats(UnitId::from(0))?.guard_imbalances, 2);
    Ok(())
}

/// Handlers run in serving context, and a raise from ordinary context is picked up by the fallback thread.
#[test]
fn raise_from_thread_context_wakes_fallback_thread() -> Result<()> {
    let engine: SharedEngine = new_engine(1, 10)?;
    let _binding: UnitBinding = bind(&engine, 0)?;
    let seen: Arc<Mutex<Option<(String, bool)>>> = Arc::new(Mutex::new(None));
    {
        let seen: Arc<Mutex<Option<(String, bool)>>> = seen.clone();
        engine.register(SoftirqKind::HRTIMER, move |_: &Dispatch<'_>| {
            let name: String = thread::current().name().unwrap_or_default().to_string();
            if let Ok(mut seen) = seen.lock() {
                *seen = Some((name, bottomhalf::in_serving_softirq()));
            }
        })?;
    }

    engine.raise(SoftirqKind::HRTIMER)?;
    wait_until(TIMEOUT, || matches!(seen.lock().map(|seen| seen.is_some()), Ok(true)))?;

    let seen: Option<(String, bool)> = match seen.lock() {
        Ok(seen) => seen.clone(),
        Err(_) => anyhow::bail!("lock poisoned"),
    };
    bottomhalf::ensure_eq!(seen, Some(("ksoftirqd/0".to_string(), true)));
    Ok(())
}

//==============================================================================
// Configuration
//==============================================================================

/// Engines can be built from a configuration file.
#[test]
fn engine_from_config() -> Result<()> {
    let config: Config = Config::from_str("softirq:\n  units: 2\n  max_restart: 5\n  max_time_us: 1000\n")?;
    let engine: SharedEngine = SharedEngine::from_config(&config)?;
    bottomhalf::ensure_eq!(engine.online_units(), vec![UnitId::from(0), UnitId::from(1)]);
    bottomhalf::ensure_eq!(engine.config().max_restart, 5);
    Ok(())
}
