// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    action::SoftirqKind,
    fail::Fail,
    limits::{
        MAX_SOFTIRQ_KINDS,
        MAX_SOFTIRQ_RESTART,
        MAX_SOFTIRQ_TIME,
        MAX_UNITS,
        NR_SOFTIRQS,
    },
};
use ::std::{
    fs,
    ops::Index,
    str::FromStr,
    thread,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Engine options.
mod softirq_config {
    pub const SECTION_NAME: &str = "softirq";
    // Number of execution units brought online at construction.
    pub const UNITS: &str = "units";
    // Pass budget of an inline invocation of the execution loop.
    pub const MAX_RESTART: &str = "max_restart";
    // Time budget of an inline invocation of the execution loop, in microseconds.
    pub const MAX_TIME_US: &str = "max_time_us";
    // Number of usable work kinds.
    pub const NR_KINDS: &str = "nr_kinds";
    // Pin each fallback thread to a processor.
    pub const PIN_FALLBACK_THREADS: &str = "pin_fallback_threads";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Engine configuration file.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Settings an engine is built from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub units: usize,
    pub max_restart: usize,
    pub max_time: Duration,
    pub nr_kinds: usize,
    pub pin_fallback_threads: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let config_s: String = fs::read_to_string(config_path)?;
        Self::from_str(&config_s)
    }

    /// Builds the engine settings. Options that are absent from both the environment and the file take their
    /// default values.
    pub fn engine_config(&self) -> Result<EngineConfig, Fail> {
        let defaults: EngineConfig = EngineConfig::default();
        Ok(EngineConfig {
            units: Self::or_default(self.units(), defaults.units)?,
            max_restart: Self::or_default(self.max_restart(), defaults.max_restart)?,
            max_time: Self::or_default(self.max_time(), defaults.max_time)?,
            nr_kinds: Self::or_default(self.nr_kinds(), defaults.nr_kinds)?,
            pin_fallback_threads: Self::or_default(self.pin_fallback_threads(), defaults.pin_fallback_threads)?,
        })
    }

    /// Reads the number of units from the environment variable first and then the underlying configuration file.
    pub fn units(&self) -> Result<usize, Fail> {
        if let Some(units) = Self::get_typed_env_option(softirq_config::UNITS)? {
            return Ok(units);
        }
        Self::get_int_option(self.get_softirq_config()?, softirq_config::UNITS)
    }

    pub fn max_restart(&self) -> Result<usize, Fail> {
        if let Some(max_restart) = Self::get_typed_env_option(softirq_config::MAX_RESTART)? {
            return Ok(max_restart);
        }
        Self::get_int_option(self.get_softirq_config()?, softirq_config::MAX_RESTART)
    }

    pub fn max_time(&self) -> Result<Duration, Fail> {
        let micros: u64 = if let Some(micros) = Self::get_typed_env_option(softirq_config::MAX_TIME_US)? {
            micros
        } else {
            Self::get_int_option(self.get_softirq_config()?, softirq_config::MAX_TIME_US)?
        };
        Ok(Duration::from_micros(micros))
    }

    pub fn nr_kinds(&self) -> Result<usize, Fail> {
        if let Some(nr_kinds) = Self::get_typed_env_option(softirq_config::NR_KINDS)? {
            return Ok(nr_kinds);
        }
        Self::get_int_option(self.get_softirq_config()?, softirq_config::NR_KINDS)
    }

    pub fn pin_fallback_threads(&self) -> Result<bool, Fail> {
        if let Some(pin) = Self::get_typed_env_option(softirq_config::PIN_FALLBACK_THREADS)? {
            return Ok(pin);
        }
        Self::get_bool_option(self.get_softirq_config()?, softirq_config::PIN_FALLBACK_THREADS)
    }

    fn get_softirq_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, softirq_config::SECTION_NAME)
    }

    /// Maps a missing option to `default`. Every other failure is propagated.
    fn or_default<T>(value: Result<T, Fail>, default: T) -> Result<T, Fail> {
        match value {
            Err(e) if e.is(libc::ENOENT) => Ok(default),
            value => value,
        }
    }

    /// Similar to `get_option`, but additionally verifies that the value is a hash.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::ENOENT, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Reads the upper-cased environment variable named after `index`, if it is set.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Same as `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }
}

impl EngineConfig {
    /// Checks that the settings describe an engine that can be built.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.units == 0 || self.units > MAX_UNITS {
            let cause: String = format!("invalid number of units (units={:?}, max={:?})", self.units, MAX_UNITS);
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if self.max_restart == 0 {
            let cause: String = format!("pass budget must be at least one (max_restart={:?})", self.max_restart);
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        // Both tasklet kinds must be usable.
        if self.nr_kinds <= SoftirqKind::TASKLET.ordinal() || self.nr_kinds > MAX_SOFTIRQ_KINDS {
            let cause: String = format!(
                "invalid number of work kinds (nr_kinds={:?}, min={:?}, max={:?})",
                self.nr_kinds,
                SoftirqKind::TASKLET.ordinal() + 1,
                MAX_SOFTIRQ_KINDS
            );
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Config {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration ({})", e);
                error!("from_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let units: usize = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_UNITS);
        Self {
            units,
            max_restart: MAX_SOFTIRQ_RESTART,
            max_time: MAX_SOFTIRQ_TIME,
            nr_kinds: NR_SOFTIRQS,
            pin_fallback_threads: false,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
