// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Execution context of the calling thread: which unit it is bound to and how deep it is nested into interrupt,
//! bottom-half-disabled and dispatch regions.
//!
//! The nesting depth is packed into a single counter. Bits 8-15 count bottom-half regions: the dispatch loop adds
//! [SOFTIRQ_OFFSET] and guarded regions add [SOFTIRQ_DISABLE_OFFSET], so the low bit of the field tells whether the
//! thread is serving deferred work. Bits 16-19 count simulated hard interrupts.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    engine::Engine,
    fail::Fail,
    unit::UnitId,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    marker::PhantomData,
    sync::Weak,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const SOFTIRQ_SHIFT: u32 = 8;
pub const HARDIRQ_SHIFT: u32 = 16;

pub const SOFTIRQ_OFFSET: u32 = 1 << SOFTIRQ_SHIFT;
pub const SOFTIRQ_DISABLE_OFFSET: u32 = 2 * SOFTIRQ_OFFSET;
pub const HARDIRQ_OFFSET: u32 = 1 << HARDIRQ_SHIFT;

pub const SOFTIRQ_MASK: u32 = 0xff << SOFTIRQ_SHIFT;
pub const HARDIRQ_MASK: u32 = 0xf << HARDIRQ_SHIFT;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Weights by which guarded regions nest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GuardWeight {
    /// Short critical section that must not be interrupted by deferred work.
    Disable,
    /// Deferred work is being dispatched; suppresses recursive dispatch.
    Serving,
    /// Simulated hard interrupt.
    Hardirq,
}

/// Association between a thread and an execution unit.
#[derive(Clone)]
pub struct Binding {
    pub engine: Weak<Engine>,
    pub unit: UnitId,
}

/// Keeps the calling thread bound to an execution unit. Dropping it unbinds the thread.
pub struct UnitBinding {
    unit: UnitId,
    // Bindings are thread-local state.
    _not_send: PhantomData<*const ()>,
}

//======================================================================================================================
// Thread Local Variables
//======================================================================================================================

thread_local! {
    static BINDING: RefCell<Option<Binding>> = const { RefCell::new(None) };
    static PREEMPT_COUNT: Cell<u32> = const { Cell::new(0) };
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl GuardWeight {
    pub fn offset(&self) -> u32 {
        match self {
            GuardWeight::Disable => SOFTIRQ_DISABLE_OFFSET,
            GuardWeight::Serving => SOFTIRQ_OFFSET,
            GuardWeight::Hardirq => HARDIRQ_OFFSET,
        }
    }

    fn mask(&self) -> u32 {
        match self {
            GuardWeight::Disable | GuardWeight::Serving => SOFTIRQ_MASK,
            GuardWeight::Hardirq => HARDIRQ_MASK,
        }
    }
}

impl UnitBinding {
    pub fn unit(&self) -> UnitId {
        self.unit
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Binds the calling thread to `unit` of `engine`.
pub fn bind(engine: Weak<Engine>, unit: UnitId) -> Result<UnitBinding, Fail> {
    BINDING.with(|binding| {
        let mut binding = binding.borrow_mut();
        if let Some(current) = binding.as_ref() {
            let cause: String = format!("thread is already bound (unit={:?})", current.unit);
            error!("bind(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        *binding = Some(Binding { engine, unit });
        PREEMPT_COUNT.with(|count| count.set(0));
        trace!("bind(): unit={:?}", unit);
        Ok(UnitBinding {
            unit,
            _not_send: PhantomData,
        })
    })
}

/// Returns the binding of the calling thread, if any.
pub fn current() -> Option<Binding> {
    BINDING.with(|binding| binding.borrow().clone())
}

/// Returns the unit the calling thread is bound to, if any.
pub fn current_unit() -> Option<UnitId> {
    BINDING.with(|binding| binding.borrow().as_ref().map(|b: &Binding| b.unit))
}

pub fn preempt_count() -> u32 {
    PREEMPT_COUNT.with(|count| count.get())
}

/// Forcibly overwrites the nesting counter. Only used to contain a handler that left it unbalanced.
pub fn restore_preempt_count(value: u32) {
    PREEMPT_COUNT.with(|count| count.set(value))
}

pub fn softirq_count() -> u32 {
    preempt_count() & SOFTIRQ_MASK
}

pub fn hardirq_count() -> u32 {
    preempt_count() & HARDIRQ_MASK
}

/// Inside a hard interrupt, a dispatch, or a guarded region.
pub fn in_interrupt() -> bool {
    preempt_count() & (SOFTIRQ_MASK | HARDIRQ_MASK) != 0
}

pub fn in_hardirq() -> bool {
    hardirq_count() != 0
}

/// Inside a dispatch or a guarded region.
pub fn in_softirq() -> bool {
    softirq_count() != 0
}

pub fn in_serving_softirq() -> bool {
    softirq_count() & SOFTIRQ_OFFSET != 0
}

/// Enters a guarded region of the given `weight`.
pub fn enter_guard(weight: GuardWeight) {
    PREEMPT_COUNT.with(|count| {
        let current: u32 = count.get();
        let next: u32 = current + weight.offset();
        // Overflowing a field would silently corrupt the neighbouring one.
        assert!(
            next & weight.mask() >= weight.offset() && next & !weight.mask() == current & !weight.mask(),
            "enter_guard(): nesting overflow (weight={:?}, count={:#010x})",
            weight,
            current
        );
        count.set(next);
    })
}

/// Leaves a guarded region of the given `weight`. Leaving a region that was never entered is fatal.
pub fn exit_guard(weight: GuardWeight) {
    PREEMPT_COUNT.with(|count| {
        let current: u32 = count.get();
        let held: u32 = current & weight.mask();
        let valid: bool = match weight {
            GuardWeight::Serving => held & SOFTIRQ_OFFSET != 0,
            GuardWeight::Disable => held.saturating_sub(held & SOFTIRQ_OFFSET) >= SOFTIRQ_DISABLE_OFFSET,
            GuardWeight::Hardirq => held >= HARDIRQ_OFFSET,
        };
        assert!(
            valid,
            "exit_guard(): unbalanced exit (weight={:?}, count={:#010x})",
            weight, current
        );
        count.set(current - weight.offset());
    })
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for UnitBinding {
    fn drop(&mut self) {
        let count: u32 = preempt_count();
        if count != 0 {
            error!(
                "UnitBinding::drop(): thread left unit {:?} with guard count {:#010x}",
                self.unit, count
            );
            restore_preempt_count(0);
        }
        BINDING.with(|binding| *binding.borrow_mut() = None);
        trace!("unbind(): unit={:?}", self.unit);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
