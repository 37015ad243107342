// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    io,
    mem,
};

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Pins the calling thread to processor `cpu`.
pub fn pin_current_thread(cpu: usize) -> Result<(), Fail> {
    if cpu >= libc::CPU_SETSIZE as usize {
        let cause: String = format!("processor out of range (cpu={:?})", cpu);
        error!("pin_current_thread(): {}", cause);
        return Err(Fail::new(libc::EINVAL, &cause));
    }

    // Safety: the set is fully initialized by CPU_ZERO before use and outlives the system call.
    let ret: libc::c_int = unsafe {
        let mut cpuset: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(cpu, &mut cpuset);
        libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpuset)
    };
    if ret != 0 {
        let e: Fail = Fail::from(io::Error::last_os_error());
        error!("pin_current_thread(): failed to set affinity (cpu={:?}): {:?}", cpu, e);
        return Err(e);
    }
    Ok(())
}
