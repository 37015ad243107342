// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// PAL: Platform Abstraction Layer
//======================================================================================================================

// This is the platform abstraction layer designed to hide the platform specific details of thread placement from the
// engine. Only Linux supports pinning threads for now.

pub mod functions;

#[cfg(target_os = "linux")]
pub mod linux;

pub use functions::{
    available_cpus,
    pin_current_thread,
};
