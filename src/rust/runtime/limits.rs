// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ::std::time::Duration;

/// Width of the pending vector. No more work kinds than this can ever be registered.
pub const MAX_SOFTIRQ_KINDS: usize = 32;

/// Number of work kinds usable by default (HI through RCU).
pub const NR_SOFTIRQS: usize = 10;

/// Maximum number of passes an inline invocation of the execution loop may make before handing off to the fallback
/// thread.
pub const MAX_SOFTIRQ_RESTART: usize = 10;

/// Wall-clock budget of an inline invocation of the execution loop.
pub const MAX_SOFTIRQ_TIME: Duration = Duration::from_millis(2);

/// Upper bound on execution unit identifiers.
pub const MAX_UNITS: usize = 256;
