//! Runtime configuration for a repository instance.
//!
//! Settings are read from an optional `ripplekeep.toml` in the working
//! directory and can be overridden through `RIPPLEKEEP_*` environment
//! variables. Every knob has a default, so a repository can always be
//! created without any configuration present.

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Compute expression cells at definition time instead of on first read.
    pub precalculate_expressions: bool,
    /// Log failed script executions. The cell still just "has no value";
    /// this only controls the diagnostic.
    pub log_script_failures: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            precalculate_expressions: false,
            log_script_failures: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let loaded = config::Config::builder()
            .add_source(config::File::with_name("ripplekeep").required(false))
            .add_source(config::Environment::with_prefix("RIPPLEKEEP").try_parsing(true))
            .build()?;
        Ok(loaded.try_deserialize::<Settings>()?)
    }
}
