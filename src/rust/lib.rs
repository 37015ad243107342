// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Deferred execution for per-unit bottom halves: prioritized work kinds, tasklets, bounded inline execution with a
//! per-unit fallback thread, and migration of pending work off units that go offline.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod pal;
pub mod runtime;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use crate::runtime::{
    action::{
        Action,
        Dispatch,
        SoftirqKind,
    },
    config::{
        Config,
        EngineConfig,
    },
    context::{
        in_hardirq,
        in_interrupt,
        in_serving_softirq,
        in_softirq,
        preempt_count,
        UnitBinding,
    },
    engine::{
        BhDisabled,
        Engine,
        SharedEngine,
    },
    fail::Fail,
    tasklet::{
        Tasklet,
        TaskletPriority,
    },
    unit::{
        UnitId,
        UnitStats,
    },
};

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Unit the calling thread is bound to, whichever engine it belongs to.
pub fn current_unit() -> Option<UnitId> {
    runtime::context::current_unit()
}

//======================================================================================================================
// Macros
//======================================================================================================================

/// Fails the enclosing `anyhow` test when both sides differ. The calling crate must depend on `anyhow`.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left, right) => {
                if !(*left == *right) {
                    ::anyhow::bail!(
                        "ensure_eq!({}, {}) failed: left={:?}, right={:?}",
                        stringify!($left),
                        stringify!($right),
                        left,
                        right
                    );
                }
            },
        }
    }};
}

/// Fails the enclosing `anyhow` test when both sides are equal.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left, right) => {
                if *left == *right {
                    ::anyhow::bail!(
                        "ensure_neq!({}, {}) failed: both are {:?}",
                        stringify!($left),
                        stringify!($right),
                        left
                    );
                }
            },
        }
    }};
}
