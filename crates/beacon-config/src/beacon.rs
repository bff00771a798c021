use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::redis::RedisConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// BeaconConfig (resolved, validated)
// ---------------------------------------------------------------------------

/// The complete engine configuration, loaded from `beacon.toml`.
///
/// Loading validates the record; a successfully constructed `BeaconConfig`
/// never needs re-checking downstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconConfig {
    pub redis: RedisConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl BeaconConfig {
    /// Read and parse a `beacon.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for BeaconConfig {
    type Err = anyhow::Error;

    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: BeaconConfig = toml::from_str(toml_str)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
