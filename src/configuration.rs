//! Config for the arena behaviors
//!
//! This module provides configuration options for controlling the behavior of the arena host.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional, and case-insensitive. Set the value to `"true"` to enable a flag.
//!
//! - `ARENA_VERBOSE`: Print one progress line per round (default: `true`)
//! - `ARENA_LOG`: Enable logging to a file (default: `false`)
//! - `ARENA_SILENCE_A`: Drop `say` output of team A (default: `false`)
//! - `ARENA_SILENCE_B`: Drop `say` output of team B (default: `false`)
//! - `ARENA_SEED`: Overrides the map seed (unsigned integer, default: unset)

use crate::world::Team;

/// Configuration for arena behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) silence_a: bool,
    pub(crate) silence_b: bool,
    pub(crate) seed: Option<u64>,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The arena will print match progress to stdout.
    /// - Logging to file is disabled.
    /// - Both teams may `say` things.
    /// - The seed of the map is used.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            silence_a: false,
            silence_b: false,
            seed: None,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// The following environment variables are recognized:
    /// - `ARENA_VERBOSE`: if set to `"true"`, enables verbose output (default: `true`)
    /// - `ARENA_LOG`: if set to `"true"`, enables logging to file (default: `false`)
    /// - `ARENA_SILENCE_A`: if set to `"true"`, silences team A (default: `false`)
    /// - `ARENA_SILENCE_B`: if set to `"true"`, silences team B (default: `false`)
    /// - `ARENA_SEED`: if set to an unsigned integer, replaces the map seed
    ///
    /// Any other value (including unset) will result in using the default value for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        Self {
            verbose: get_env_flag("ARENA_VERBOSE", true),
            log: get_env_flag("ARENA_LOG", false),
            silence_a: get_env_flag("ARENA_SILENCE_A", false),
            silence_b: get_env_flag("ARENA_SILENCE_B", false),
            seed: std::env::var("ARENA_SEED")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
        }
    }

    /// Enable or disable silent mode.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Silence (or not) the `say` output of `team`.
    pub fn with_silenced(mut self, team: Team, value: bool) -> Self {
        match team {
            Team::A => self.silence_a = value,
            Team::B => self.silence_b = value,
        }
        self
    }

    /// Replace the seed of every map played with this configuration.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether `say` output of `team` is dropped.
    pub fn is_silenced(&self, team: Team) -> bool {
        match team {
            Team::A => self.silence_a,
            Team::B => self.silence_b,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
