// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    action::SoftirqKind,
    limits::MAX_SOFTIRQ_KINDS,
};
use ::bit_iter::BitIter;
use ::std::mem;

//==============================================================================
// Structures
//==============================================================================

/// Per-unit bit vector of work kinds with outstanding work. Bit `k` set means kind `k` must be dispatched on the owning
/// unit. The vector lives inside the unit's local state and is only touched while that state is locked.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct PendingVector(u32);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Pending Vectors
impl PendingVector {
    /// Creates a pending vector from raw bits.
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Marks `kind` as pending.
    pub fn raise(&mut self, kind: SoftirqKind) {
        self.0 |= kind.mask();
    }

    /// Merges all bits of `bits` into the target vector.
    pub fn merge(&mut self, bits: u32) {
        self.0 |= bits;
    }

    /// Checks whether `kind` is pending.
    pub fn is_raised(&self, kind: SoftirqKind) -> bool {
        self.0 & kind.mask() != 0
    }

    /// Returns the raw bits stored in the target vector.
    pub fn load(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Snapshots the vector and zeroes it. This is the only place where bits get cleared.
    pub fn take(&mut self) -> u32 {
        mem::replace(&mut self.0, 0)
    }

    /// Iterates over the kinds set in `bits`, lowest ordinal first.
    pub fn kinds(bits: u32) -> impl Iterator<Item = SoftirqKind> {
        BitIter::from(bits)
            .filter(|bit: &usize| *bit < MAX_SOFTIRQ_KINDS)
            .map(SoftirqKind::from_bit)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl ::std::fmt::Debug for PendingVector {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "PendingVector({:#010x})", self.0)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
