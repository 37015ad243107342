// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Per-unit fallback thread (`ksoftirqd/N`). It picks up deferred work that inline invocations of the execution loop
//! handed off, and runs it one bounded pass at a time so that it never monopolizes its processor.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal,
    runtime::{
        context,
        engine::Engine,
        fail::Fail,
        unit::Unit,
    },
};
use ::crossbeam_channel::{
    Receiver,
    RecvError,
    Sender,
    TryRecvError,
    TrySendError,
};
use ::std::{
    sync::{
        Arc,
        Weak,
    },
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Handle to a running fallback thread.
pub struct FallbackThread {
    waker: Sender<()>,
    handle: JoinHandle<()>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FallbackThread {
    /// Spawns the fallback thread of `unit`, optionally pinned to processor `cpu`.
    pub fn spawn(engine: Weak<Engine>, unit: Arc<Unit>, cpu: Option<usize>) -> Result<Self, Fail> {
        // A single slot is enough: wakeups coalesce.
        let (waker, parked): (Sender<()>, Receiver<()>) = ::crossbeam_channel::bounded(1);
        let name: String = format!("ksoftirqd/{}", unit.id());
        let handle: JoinHandle<()> = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(engine, unit, parked, cpu))?;
        Ok(Self { waker, handle })
    }

    /// Wakes the thread. Returns `false` if a wakeup was already outstanding or the thread is gone.
    pub fn wake(&self) -> bool {
        match self.waker.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }

    /// Stops the thread and waits for it to exit. A fallback thread retiring itself is not joined.
    pub fn retire(self) {
        let FallbackThread { waker, handle } = self;
        drop(waker);
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("retire(): fallback thread panicked");
        }
    }

    fn run(engine: Weak<Engine>, unit: Arc<Unit>, parked: Receiver<()>, cpu: Option<usize>) {
        if let Some(cpu) = cpu {
            if let Err(e) = pal::pin_current_thread(cpu) {
                warn!("run(): cannot pin fallback thread (unit={:?}, cpu={:?}): {:?}", unit.id(), cpu, e);
            }
        }
        let _binding: context::UnitBinding = match context::bind(engine.clone(), unit.id()) {
            Ok(binding) => binding,
            Err(e) => {
                error!("run(): cannot bind fallback thread (unit={:?}): {:?}", unit.id(), e);
                return;
            },
        };
        debug!("run(): fallback thread started (unit={:?})", unit.id());

        loop {
            if !unit.has_pending() {
                unit.set_fallback_running(false);
                // A raise that saw the flag set right before we cleared it did not wake us.
                if !unit.has_pending() {
                    match parked.recv() {
                        Ok(()) => (),
                        Err(RecvError) => break,
                    }
                }
                unit.set_fallback_running(true);
            } else {
                match parked.try_recv() {
                    Ok(()) | Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => break,
                }
            }

            match engine.upgrade() {
                Some(engine) => engine.run_fallback_pass(&unit),
                None => break,
            }
            thread::yield_now();
        }

        unit.set_fallback_running(false);
        debug!("run(): fallback thread stopped (unit={:?})", unit.id());
    }
}
