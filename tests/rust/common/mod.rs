// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![allow(dead_code)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::bottomhalf::{
    EngineConfig,
    SharedEngine,
};
use ::std::{
    thread,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Constants
//==============================================================================

/// How long tests wait for asynchronous work before giving up.
pub const TIMEOUT: Duration = Duration::from_secs(10);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Builds an engine with `units` units and a pass budget of `max_restart`.
pub fn new_engine(units: usize, max_restart: usize) -> Result<SharedEngine> {
    let config: EngineConfig = EngineConfig {
        units,
        max_restart,
        ..EngineConfig::default()
    };
    match SharedEngine::new(config) {
        Ok(engine) => Ok(engine),
        Err(e) => anyhow::bail!("failed to create engine: {:?}", e),
    }
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> Result<()> {
    let deadline: Instant = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            anyhow::bail!("condition did not hold within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
