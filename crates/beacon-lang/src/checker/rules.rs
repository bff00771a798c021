use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::ast::{
    ActionDecl, ConditionDecl, ConditionGroup, ConditionNode, Expr, FallbackPolicy, RuleDecl,
    RuleFile,
};
use crate::checker::types::{ValType, infer};
use crate::checker::CheckError;

/// Key namespaces a `set`/`buffer` target may live in.
const KEY_NAMESPACES: &[&str] = &["input:", "output:", "state:", "buffer:"];

pub(super) fn check_duplicate_names(file: &RuleFile, errors: &mut Vec<CheckError>) {
    let mut seen = BTreeSet::new();
    for rule in &file.rules {
        if !seen.insert(rule.name.as_str()) {
            errors.push(CheckError::error(
                &rule.name,
                "duplicate rule name".to_string(),
            ));
        }
    }
}

/// All keys any enabled rule produces via `set`.
pub(super) fn produced_keys(file: &RuleFile) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for rule in file.rules.iter().filter(|r| r.enabled) {
        for action in rule.actions.iter().chain(&rule.else_actions) {
            if let ActionDecl::Set { key, .. } = action {
                keys.insert(key.clone());
            }
        }
    }
    keys
}

// ---------------------------------------------------------------------------
// Group structure
// ---------------------------------------------------------------------------

/// Top-level groups must carry at least one condition leaf; empty nested
/// groups evaluate True and only warn.
pub(super) fn check_group_structure(rule: &RuleDecl, errors: &mut Vec<CheckError>) {
    if count_leaves(&rule.conditions) == 0 {
        errors.push(CheckError::error(
            &rule.name,
            "condition group has no condition leaf",
        ));
        return;
    }
    warn_empty_nested(&rule.conditions, rule, errors);
}

fn count_leaves(group: &ConditionGroup) -> usize {
    group
        .members
        .iter()
        .map(|m| match m {
            ConditionNode::Leaf(_) => 1,
            ConditionNode::Group(g) => count_leaves(g),
        })
        .sum()
}

fn warn_empty_nested(group: &ConditionGroup, rule: &RuleDecl, errors: &mut Vec<CheckError>) {
    for member in &group.members {
        if let ConditionNode::Group(g) = member {
            if g.members.is_empty() {
                errors.push(CheckError::warning(
                    &rule.name,
                    "empty nested condition group always evaluates true",
                ));
            } else {
                warn_empty_nested(g, rule, errors);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Condition leaves
// ---------------------------------------------------------------------------

pub(super) fn check_condition_leaves(
    rule: &RuleDecl,
    retention: Option<Duration>,
    errors: &mut Vec<CheckError>,
) {
    visit_leaves(&rule.conditions, &mut |leaf| {
        if let ConditionDecl::ThresholdOverTime {
            sensor,
            op,
            duration,
            ..
        } = leaf
        {
            if !op.is_ordered() {
                errors.push(CheckError::error(
                    &rule.name,
                    format!(
                        "threshold_over_time on {sensor:?} needs an ordered operator, got `{}`",
                        op.as_str()
                    ),
                ));
            }
            if duration.is_zero() {
                errors.push(CheckError::error(
                    &rule.name,
                    format!("threshold_over_time on {sensor:?} needs duration > 0"),
                ));
            } else if let Some(retention) = retention
                && *duration > retention
            {
                errors.push(CheckError::warning(
                    &rule.name,
                    format!(
                        "threshold_over_time duration {}ms exceeds sensor retention {}ms",
                        duration.as_millis(),
                        retention.as_millis()
                    ),
                ));
            }
        }
    });
}

fn visit_leaves(group: &ConditionGroup, f: &mut impl FnMut(&ConditionDecl)) {
    for member in &group.members {
        match member {
            ConditionNode::Leaf(leaf) => f(leaf),
            ConditionNode::Group(g) => visit_leaves(g, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

pub(super) fn check_actions(rule: &RuleDecl, errors: &mut Vec<CheckError>) {
    for action in rule.actions.iter().chain(&rule.else_actions) {
        match action {
            ActionDecl::Set {
                key,
                value,
                value_expression,
                ..
            } => {
                check_value_pair(rule, "set", key, value.is_some(), value_expression.is_some(), errors);
            }
            ActionDecl::Buffer {
                key,
                value,
                value_expression,
                max_items,
                ..
            } => {
                check_value_pair(
                    rule,
                    "buffer",
                    key,
                    value.is_some(),
                    value_expression.is_some(),
                    errors,
                );
                if *max_items == 0 {
                    errors.push(CheckError::error(
                        &rule.name,
                        format!("buffer {key:?} needs max_items > 0"),
                    ));
                }
            }
            ActionDecl::SendMessage {
                channel,
                message,
                message_expression,
            } => {
                if channel.trim().is_empty() {
                    errors.push(CheckError::error(
                        &rule.name,
                        "send_message needs a non-empty channel",
                    ));
                }
                if message.is_some() == message_expression.is_some() {
                    errors.push(CheckError::error(
                        &rule.name,
                        "send_message needs exactly one of `message` or `message_expression`",
                    ));
                }
            }
            ActionDecl::Log { .. } => {}
        }
    }
}

fn check_value_pair(
    rule: &RuleDecl,
    kind: &str,
    key: &str,
    has_value: bool,
    has_expr: bool,
    errors: &mut Vec<CheckError>,
) {
    if has_value == has_expr {
        errors.push(CheckError::error(
            &rule.name,
            format!("{kind} {key:?} needs exactly one of `value` or `value_expression`"),
        ));
    }
    if key.trim().is_empty() {
        errors.push(CheckError::error(
            &rule.name,
            format!("{kind} action needs a non-empty key"),
        ));
    } else if !KEY_NAMESPACES.iter().any(|ns| key.starts_with(ns)) {
        errors.push(CheckError::error(
            &rule.name,
            format!(
                "{kind} key {key:?} is outside the configured namespaces ({})",
                KEY_NAMESPACES.join(", ")
            ),
        ));
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

pub(super) fn check_inputs(rule: &RuleDecl, errors: &mut Vec<CheckError>) {
    for input in &rule.inputs {
        if let FallbackPolicy::UseLastKnown { max_age } = &input.fallback
            && max_age.is_zero()
        {
            errors.push(CheckError::error(
                &rule.name,
                format!("input {:?}: use_last_known needs max_age > 0", input.id),
            ));
        }
        // skip_rule stops the whole rule when the input is missing, which
        // contradicts marking the input optional.
        if !input.required && matches!(input.fallback, FallbackPolicy::SkipRule) {
            errors.push(CheckError::warning(
                &rule.name,
                format!(
                    "input {:?}: skip_rule fallback on an optional input; the rule still skips when it is missing",
                    input.id
                ),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor references
// ---------------------------------------------------------------------------

/// Every sensor a rule reads must be a declared input, a catalog sensor, or
/// a key some rule produces. Without a catalog, namespaced keys are accepted
/// as store-resident sensors.
pub(super) fn check_sensor_refs(
    rule: &RuleDecl,
    known_sensors: &[String],
    produced: &BTreeSet<String>,
    errors: &mut Vec<CheckError>,
) {
    let declared: BTreeSet<&str> = rule.inputs.iter().map(|i| i.id.as_str()).collect();
    for key in referenced_sensors(rule) {
        let ok = declared.contains(key.as_str())
            || produced.contains(&key)
            || if known_sensors.is_empty() {
                KEY_NAMESPACES.iter().any(|ns| key.starts_with(ns))
            } else {
                known_sensors.iter().any(|s| s == &key)
            };
        if !ok {
            errors.push(CheckError::error(
                &rule.name,
                format!("sensor {key:?} is not a declared input, known sensor, or produced key"),
            ));
        }
    }
}

/// All sensor keys a rule reads: condition sensors plus sensors inside
/// condition, value, and message expressions.
pub fn referenced_sensors(rule: &RuleDecl) -> BTreeSet<String> {
    let mut keys = Vec::new();
    visit_leaves(&rule.conditions, &mut |leaf| match leaf {
        ConditionDecl::Comparison { sensor, .. } => keys.push(sensor.key.clone()),
        ConditionDecl::ThresholdOverTime { sensor, .. } => keys.push(sensor.clone()),
        ConditionDecl::Expression { expr } => expr.sensor_keys(&mut keys),
    });
    for action in rule.actions.iter().chain(&rule.else_actions) {
        for expr in action_exprs(action) {
            expr.sensor_keys(&mut keys);
        }
    }
    keys.into_iter().collect()
}

fn action_exprs(action: &ActionDecl) -> Vec<&Expr> {
    match action {
        ActionDecl::Set {
            value_expression, ..
        }
        | ActionDecl::Buffer {
            value_expression, ..
        } => value_expression.iter().collect(),
        ActionDecl::SendMessage {
            message_expression, ..
        } => message_expression.iter().collect(),
        ActionDecl::Log { .. } => Vec::new(),
    }
}

/// Warn when two sensor references differ only in casing; that is almost
/// always a typo against a case-sensitive store.
pub(super) fn check_sensor_casing(file: &RuleFile, errors: &mut Vec<CheckError>) {
    let mut by_lower: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for rule in &file.rules {
        for key in referenced_sensors(rule) {
            by_lower.entry(key.to_ascii_lowercase()).or_default().insert(key);
        }
    }
    for (lower, spellings) in by_lower {
        if spellings.len() > 1 {
            errors.push(CheckError {
                severity: super::Severity::Warning,
                rule: None,
                message: format!(
                    "sensor {lower:?} referenced with inconsistent casing: {}",
                    spellings.into_iter().collect::<Vec<_>>().join(", ")
                ),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Unreachable else
// ---------------------------------------------------------------------------

/// An `else` block behind a constant-true condition can never fire.
pub(super) fn check_unreachable_else(rule: &RuleDecl, errors: &mut Vec<CheckError>) {
    if !rule.else_actions.is_empty() && group_is_const_true(&rule.conditions) {
        errors.push(CheckError::warning(
            &rule.name,
            "else block is unreachable: condition group is constant-true",
        ));
    }
}

fn group_is_const_true(group: &ConditionGroup) -> bool {
    if group.members.is_empty() {
        return true;
    }
    let member_true = |m: &ConditionNode| match m {
        ConditionNode::Leaf(ConditionDecl::Expression { expr }) => matches!(expr, Expr::Bool(true)),
        ConditionNode::Leaf(_) => false,
        ConditionNode::Group(g) => group_is_const_true(g),
    };
    match group.kind {
        crate::ast::GroupKind::All => group.members.iter().all(member_true),
        crate::ast::GroupKind::Any => group.members.iter().any(member_true),
    }
}

// ---------------------------------------------------------------------------
// Condition expression typing
// ---------------------------------------------------------------------------

pub(super) fn check_condition_expression_types(rule: &RuleDecl, errors: &mut Vec<CheckError>) {
    visit_leaves(&rule.conditions, &mut |leaf| {
        if let ConditionDecl::Expression { expr } = leaf {
            match infer(expr) {
                ValType::Number | ValType::Str => errors.push(CheckError::warning(
                    &rule.name,
                    "condition expression does not evaluate to a boolean",
                )),
                ValType::Bool | ValType::Unknown => {}
            }
        }
    });
}
