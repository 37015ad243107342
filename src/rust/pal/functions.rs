// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::thread;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Number of processors the process may run on. Never zero.
pub fn available_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub use crate::pal::linux::pin_current_thread;
    } else {
        use crate::runtime::fail::Fail;

        /// Pins the calling thread to processor `cpu`.
        pub fn pin_current_thread(cpu: usize) -> Result<(), Fail> {
            let cause: String = format!("thread pinning is not supported on this platform (cpu={:?})", cpu);
            warn!("pin_current_thread(): {}", cause);
            Err(Fail::new(libc::ENOSYS, &cause))
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
