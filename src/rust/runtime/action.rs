// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Work kinds and the global table that maps each kind to its registered handler.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    engine::Engine,
    fail::Fail,
    limits::MAX_SOFTIRQ_KINDS,
    unit::{
        Unit,
        UnitId,
    },
};
use ::std::{
    fmt,
    sync::OnceLock,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Diagnostic names of the well-known kinds, indexed by ordinal.
const SOFTIRQ_NAMES: [&str; 10] = [
    "HI", "TIMER", "NET_TX", "NET_RX", "BLOCK", "IRQ_POLL", "TASKLET", "SCHED", "HRTIMER", "RCU",
];

//======================================================================================================================
// Structures
//======================================================================================================================

/// A deferred-work category. Lower ordinals are dispatched first.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SoftirqKind(u8);

/// Handler registered for a work kind.
pub trait Action: Send + Sync {
    fn run(&self, dispatch: &Dispatch<'_>);
}

/// What a handler gets to see about the invocation it is serving.
pub struct Dispatch<'a> {
    engine: &'a Engine,
    unit: &'a Unit,
    kind: SoftirqKind,
}

/// Kind to handler mapping. Slots are written once, at initialization, and never cleared.
pub struct ActionTable {
    actions: [OnceLock<Box<dyn Action>>; MAX_SOFTIRQ_KINDS],
    nr_kinds: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SoftirqKind {
    pub const HI: SoftirqKind = SoftirqKind(0);
    pub const TIMER: SoftirqKind = SoftirqKind(1);
    pub const NET_TX: SoftirqKind = SoftirqKind(2);
    pub const NET_RX: SoftirqKind = SoftirqKind(3);
    pub const BLOCK: SoftirqKind = SoftirqKind(4);
    pub const IRQ_POLL: SoftirqKind = SoftirqKind(5);
    pub const TASKLET: SoftirqKind = SoftirqKind(6);
    pub const SCHED: SoftirqKind = SoftirqKind(7);
    pub const HRTIMER: SoftirqKind = SoftirqKind(8);
    pub const RCU: SoftirqKind = SoftirqKind(9);

    /// Creates a kind from its ordinal. Fails if the ordinal does not fit in the pending vector.
    pub fn new(ordinal: u8) -> Result<Self, Fail> {
        if usize::from(ordinal) >= MAX_SOFTIRQ_KINDS {
            let cause: String = format!("work kind out of range (ordinal={:?})", ordinal);
            error!("SoftirqKind::new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(Self(ordinal))
    }

    /// Kind of pending vector bit `bit`. The caller guarantees that the bit is in range.
    pub(crate) fn from_bit(bit: usize) -> Self {
        debug_assert!(bit < MAX_SOFTIRQ_KINDS);
        Self(bit as u8)
    }

    pub fn ordinal(&self) -> usize {
        usize::from(self.0)
    }

    /// Bit of this kind in a pending vector.
    pub fn mask(&self) -> u32 {
        1 << self.0
    }

    /// Human-readable name. Only meant for diagnostics.
    pub fn name(&self) -> &'static str {
        SOFTIRQ_NAMES.get(self.ordinal()).copied().unwrap_or("UNNAMED")
    }
}

impl<'a> Dispatch<'a> {
    pub(crate) fn new(engine: &'a Engine, unit: &'a Unit, kind: SoftirqKind) -> Self {
        Self { engine, unit, kind }
    }

    /// Engine that is running this handler.
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// Unit on which this handler is running.
    pub fn unit(&self) -> UnitId {
        self.unit.id()
    }

    pub(crate) fn target(&self) -> &'a Unit {
        self.unit
    }

    pub fn kind(&self) -> SoftirqKind {
        self.kind
    }
}

impl ActionTable {
    pub fn new(nr_kinds: usize) -> Self {
        Self {
            actions: ::std::array::from_fn(|_| OnceLock::new()),
            nr_kinds,
        }
    }

    /// Installs `action` for `kind`.
    pub fn register(&self, kind: SoftirqKind, action: Box<dyn Action>) -> Result<(), Fail> {
        if kind.ordinal() >= self.nr_kinds {
            let cause: String = format!(
                "work kind is not configured (kind={:?}, nr_kinds={:?})",
                kind, self.nr_kinds
            );
            error!("register(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        match self.actions[kind.ordinal()].set(action) {
            Ok(()) => {
                trace!("register(): kind={:?}", kind);
                Ok(())
            },
            Err(_) => {
                let cause: String = format!("work kind already registered (kind={:?})", kind);
                error!("register(): {}", cause);
                Err(Fail::new(libc::EEXIST, &cause))
            },
        }
    }

    pub fn get(&self, kind: SoftirqKind) -> Option<&dyn Action> {
        self.actions.get(kind.ordinal())?.get().map(|action: &Box<dyn Action>| action.as_ref())
    }

    pub fn is_registered(&self, kind: SoftirqKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn nr_kinds(&self) -> usize {
        self.nr_kinds
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<F> Action for F
where
    F: Fn(&Dispatch<'_>) + Send + Sync,
{
    fn run(&self, dispatch: &Dispatch<'_>) {
        self(dispatch)
    }
}

impl fmt::Debug for SoftirqKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl TryFrom<u8> for SoftirqKind {
    type Error = Fail;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SoftirqKind> for usize {
    fn from(value: SoftirqKind) -> Self {
        value.ordinal()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
