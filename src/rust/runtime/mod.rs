// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod action;
pub mod config;
pub mod context;
pub mod engine;
pub mod fail;
pub mod fallback;
pub mod limits;
pub mod logging;
pub mod pending;
pub mod tasklet;
pub mod unit;
