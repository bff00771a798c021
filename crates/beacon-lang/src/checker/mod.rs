mod rules;
pub mod types;

pub use rules::referenced_sensors;

#[cfg(test)]
mod tests;

use std::time::Duration;

use crate::ast::RuleFile;

/// Severity of a [`CheckError`]. Warnings never block compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Semantic check finding with optional rule context.
#[derive(Debug, Clone)]
pub struct CheckError {
    pub severity: Severity,
    pub rule: Option<String>,
    pub message: String,
}

impl CheckError {
    pub(crate) fn error(rule: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            rule: Some(rule.to_string()),
            message: message.into(),
        }
    }

    pub(crate) fn warning(rule: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            rule: Some(rule.to_string()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.rule {
            Some(r) => write!(f, "{tag}: rule `{r}`: {}", self.message),
            None => write!(f, "{tag}: {}", self.message),
        }
    }
}

/// Inputs the checker needs beyond the rule file itself.
pub struct CheckContext<'a> {
    /// Sensors the engine accepts without a declaration (catalog).
    pub known_sensors: &'a [String],
    /// How far back the temporal cache can reach
    /// (`buffer_capacity × cycle_time`); durations beyond this warn.
    pub retention: Option<Duration>,
}

/// Run all semantic checks over a parsed rule file.
///
/// Returns every finding; callers treat any [`Severity::Error`] entry as
/// fatal and surface warnings.
pub fn check_rules(file: &RuleFile, ctx: &CheckContext<'_>) -> Vec<CheckError> {
    let mut errors = Vec::new();

    rules::check_duplicate_names(file, &mut errors);

    let produced = rules::produced_keys(file);
    for rule in &file.rules {
        rules::check_group_structure(rule, &mut errors);
        rules::check_condition_leaves(rule, ctx.retention, &mut errors);
        rules::check_actions(rule, &mut errors);
        rules::check_inputs(rule, &mut errors);
        rules::check_sensor_refs(rule, ctx.known_sensors, &produced, &mut errors);
        rules::check_unreachable_else(rule, &mut errors);
        rules::check_condition_expression_types(rule, &mut errors);
    }

    rules::check_sensor_casing(file, &mut errors);

    errors
}
