use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Engine cycle and compilation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Fixed cycle period in milliseconds.
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
    /// Default temporal ring capacity for sensors without a compiled
    /// window requirement.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Rule-dependency depth beyond which the checker warns.
    #[serde(default = "default_max_dependency_depth")]
    pub max_dependency_depth: usize,
    /// Glob for rule definition files, resolved against the config dir.
    pub rules: String,
    /// Optional catalog of sensors the engine accepts without declaration.
    #[serde(default)]
    pub known_sensors: Vec<String>,
    /// When set, the scheduler does not free-run; cycles are driven on
    /// demand (or at `test_mode_cycle_time_ms` when given).
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub test_mode_cycle_time_ms: Option<u64>,
    /// Grace period for draining pending publishes at shutdown.
    #[serde(default = "default_publish_grace_ms")]
    pub publish_grace_ms: u64,
}

fn default_cycle_time_ms() -> u64 {
    100
}

fn default_buffer_capacity() -> usize {
    100
}

fn default_max_dependency_depth() -> usize {
    10
}

fn default_publish_grace_ms() -> u64 {
    2_000
}

impl EngineConfig {
    /// Effective cycle period, honouring the test-mode override.
    pub fn effective_cycle_time_ms(&self) -> u64 {
        if self.test_mode {
            self.test_mode_cycle_time_ms.unwrap_or(self.cycle_time_ms)
        } else {
            self.cycle_time_ms
        }
    }
}

/// Resolve a glob pattern against `base_dir`, returning matching paths in
/// sorted order. A pattern that matches nothing is an error.
pub fn resolve_glob(pattern: &str, base_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        base_dir.join(pattern).display().to_string()
    };
    let mut paths: Vec<PathBuf> = glob::glob(&full)
        .map_err(|e| anyhow::anyhow!("invalid glob {pattern:?}: {e}"))?
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("glob walk failed for {pattern:?}: {e}"))?;
    paths.sort();
    if paths.is_empty() {
        anyhow::bail!("no files match rule glob {pattern:?}");
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_cycle_time_honours_test_mode() {
        let mut cfg: EngineConfig = toml::from_str(r#"rules = "rules/*.yaml""#).unwrap();
        assert_eq!(cfg.cycle_time_ms, 100);
        assert_eq!(cfg.effective_cycle_time_ms(), 100);

        cfg.test_mode = true;
        cfg.test_mode_cycle_time_ms = Some(5);
        assert_eq!(cfg.effective_cycle_time_ms(), 5);
    }

    #[test]
    fn defaults_applied() {
        let cfg: EngineConfig = toml::from_str(r#"rules = "rules/*.yaml""#).unwrap();
        assert_eq!(cfg.buffer_capacity, 100);
        assert_eq!(cfg.max_dependency_depth, 10);
        assert!(!cfg.test_mode);
    }

    #[test]
    fn unknown_engine_field_rejected() {
        let err = toml::from_str::<EngineConfig>(
            r#"
rules = "rules/*.yaml"
cycle_period = 100
"#,
        );
        assert!(err.is_err());
    }
}
