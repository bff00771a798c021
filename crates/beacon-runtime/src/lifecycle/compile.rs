use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use orion_error::prelude::*;
use orion_error::{ErrorOwe, ErrorOweBase};

use beacon_config::{BeaconConfig, resolve_glob};
use beacon_lang::ast::RuleFile;
use beacon_lang::checker::CheckError;
use beacon_lang::compiler::{CompileOptions, compile};
use beacon_lang::dsl::parse_rules;
use beacon_lang::plan::RulePlan;

use crate::error::{RuntimeReason, RuntimeResult};

/// Load every rule file matching the configured glob and merge them into
/// one [`RuleFile`]; cross-file dependencies layer normally.
pub(super) fn load_rule_files(glob: &str, base_dir: &Path) -> RuntimeResult<RuleFile> {
    let paths = resolve_glob(glob, base_dir).owe_conf()?;
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let text = std::fs::read_to_string(path)
            .owe_sys()
            .position(path.display().to_string())?;
        let file = parse_rules(&text)
            .owe(RuntimeReason::Bootstrap)
            .position(path.display().to_string())?;
        bcn_debug!(conf, file = %path.display(), rules = file.rules.len(), "loaded rule file");
        files.push(file);
    }
    Ok(RuleFile::merge(files))
}

/// Parse and compile the configured rule set into an immutable plan.
pub(super) fn compile_plan(
    config: &BeaconConfig,
    base_dir: &Path,
) -> RuntimeResult<(Arc<RulePlan>, Vec<CheckError>)> {
    let file = load_rule_files(&config.engine.rules, base_dir)?;
    let disabled = file.rules.iter().filter(|r| !r.enabled).count();
    if disabled > 0 {
        bcn_info!(conf, disabled, "dropping disabled rules from the plan");
    }
    let opts = CompileOptions {
        known_sensors: config.engine.known_sensors.clone(),
        max_dependency_depth: config.engine.max_dependency_depth,
        cycle_time: Duration::from_millis(config.engine.effective_cycle_time_ms()),
        default_buffer_capacity: config.engine.buffer_capacity,
    };
    let out = compile(&file, &opts).owe(RuntimeReason::Bootstrap)?;
    for warning in &out.warnings {
        bcn_warn!(conf, warning = %warning, "rule compilation warning");
    }
    Ok((Arc::new(out.plan), out.warnings))
}
