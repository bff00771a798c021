use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::ast::{
    ActionDecl, ConditionGroup, ConditionNode, ConditionDecl, GroupKind, RuleDecl, RuleFile,
    ScalarLit,
};
use crate::checker::{CheckContext, CheckError, Severity, check_rules};
use crate::deps::{assign_layers, reads_of, writes_of};
use crate::plan::{
    ActionPlan, BufferSpec, CondPlan, GroupPlan, InputPlan, Layer, RuleExec, RulePlan, ValuePlan,
};


/// Compilation inputs beyond the rule file: the sensor catalog and the
/// engine settings the plan is sized against.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub known_sensors: Vec<String>,
    pub max_dependency_depth: usize,
    pub cycle_time: Duration,
    pub default_buffer_capacity: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            known_sensors: Vec::new(),
            max_dependency_depth: 10,
            cycle_time: Duration::from_millis(100),
            default_buffer_capacity: 100,
        }
    }
}

/// A compiled plan plus the non-fatal findings produced along the way.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub plan: RulePlan,
    pub warnings: Vec<CheckError>,
}

/// Compile a parsed rule file into an executable [`RulePlan`].
///
/// Runs semantic checks first; a successful return implies the file was
/// both syntactically and semantically valid. Compiling the same file with
/// the same options always yields an identical plan (layers and rule order
/// included).
pub fn compile(file: &RuleFile, opts: &CompileOptions) -> anyhow::Result<CompileOutput> {
    let retention = opts
        .cycle_time
        .checked_mul(opts.default_buffer_capacity as u32);
    let findings = check_rules(
        file,
        &CheckContext {
            known_sensors: &opts.known_sensors,
            retention,
        },
    );
    let (errors, mut warnings): (Vec<_>, Vec<_>) = findings
        .into_iter()
        .partition(|f| f.severity == Severity::Error);
    if !errors.is_empty() {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("semantic errors:\n{}", msgs.join("\n"));
    }

    let enabled: Vec<&RuleDecl> = file.rules.iter().filter(|r| r.enabled).collect();

    check_constant_conflicts(&enabled)?;

    let assignment = assign_layers(&enabled)?;
    if assignment.depth() > opts.max_dependency_depth {
        warnings.push(CheckError {
            severity: Severity::Warning,
            rule: None,
            message: format!(
                "dependency depth {} exceeds configured maximum {}",
                assignment.depth(),
                opts.max_dependency_depth
            ),
        });
    }

    let by_name: BTreeMap<&str, &RuleDecl> =
        enabled.iter().map(|r| (r.name.as_str(), *r)).collect();

    let mut layers = Vec::with_capacity(assignment.layers.len());
    for layer_names in &assignment.layers {
        let mut rules = Vec::with_capacity(layer_names.len());
        for name in layer_names {
            let rule = by_name
                .get(name.as_str())
                .ok_or_else(|| anyhow::anyhow!("layered rule {name:?} missing from rule set"))?;
            rules.push(compile_rule(rule)?);
        }
        layers.push(Layer { rules });
    }

    let mut fetch_keys: BTreeSet<String> = BTreeSet::new();
    for rule in &enabled {
        fetch_keys.extend(reads_of(rule));
    }

    let plan = RulePlan {
        layers,
        fetch_keys: fetch_keys.into_iter().collect(),
        buffer_specs: buffer_specs(&enabled, opts.cycle_time),
        cycle_time: opts.cycle_time,
    };
    Ok(CompileOutput { plan, warnings })
}

// ---------------------------------------------------------------------------
// Constant-conflict rejection
// ---------------------------------------------------------------------------

/// Two rules writing the same key with different constant values can never
/// both be right; reject at compile time. Non-constant writes to a shared
/// key stay legal (last-writer-wins at runtime, counted).
fn check_constant_conflicts(rules: &[&RuleDecl]) -> anyhow::Result<()> {
    let mut constants: BTreeMap<&str, (&str, &ScalarLit)> = BTreeMap::new();
    for rule in rules {
        for action in rule.actions.iter().chain(&rule.else_actions) {
            if let ActionDecl::Set {
                key,
                value: Some(lit),
                ..
            } = action
            {
                if let Some((prev_rule, prev_lit)) = constants.get(key.as_str()) {
                    if *prev_rule != rule.name && *prev_lit != lit {
                        anyhow::bail!(
                            "rules `{prev_rule}` and `{}` write conflicting constants to {key:?}",
                            rule.name
                        );
                    }
                } else {
                    constants.insert(key, (rule.name.as_str(), lit));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Buffer sizing
// ---------------------------------------------------------------------------

/// Ring capacity: `ceil(max_window / cycle_time) × 1.2`, floor 4.
fn ring_capacity(max_window: Duration, cycle_time: Duration) -> usize {
    let period_ms = cycle_time.as_millis().max(1) as u64;
    let window_ms = max_window.as_millis() as u64;
    let steps = window_ms.div_ceil(period_ms);
    let padded = (steps * 12).div_ceil(10);
    (padded as usize).max(4)
}

fn buffer_specs(rules: &[&RuleDecl], cycle_time: Duration) -> Vec<BufferSpec> {
    let mut windows: BTreeMap<String, Duration> = BTreeMap::new();
    let mut note = |sensor: &str, d: Duration| {
        let entry = windows.entry(sensor.to_string()).or_insert(Duration::ZERO);
        if d > *entry {
            *entry = d;
        }
    };

    for rule in rules {
        visit_group(&rule.conditions, &mut |leaf| {
            if let ConditionDecl::ThresholdOverTime {
                sensor, duration, ..
            } = leaf
            {
                note(sensor, *duration);
            }
        });
        for input in &rule.inputs {
            if let crate::ast::FallbackPolicy::UseLastKnown { max_age } = &input.fallback {
                note(&input.id, *max_age);
            }
        }
    }

    windows
        .into_iter()
        .map(|(sensor, max_window)| BufferSpec {
            capacity: ring_capacity(max_window, cycle_time),
            sensor,
            max_window,
        })
        .collect()
}

fn visit_group(group: &ConditionGroup, f: &mut impl FnMut(&ConditionDecl)) {
    for member in &group.members {
        match member {
            ConditionNode::Leaf(leaf) => f(leaf),
            ConditionNode::Group(g) => visit_group(g, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-rule lowering
// ---------------------------------------------------------------------------

fn compile_rule(rule: &RuleDecl) -> anyhow::Result<RuleExec> {
    Ok(RuleExec {
        name: rule.name.clone(),
        inputs: rule
            .inputs
            .iter()
            .map(|i| InputPlan {
                id: i.id.clone(),
                required: i.required,
                fallback: i.fallback.clone(),
            })
            .collect(),
        condition: compile_group(&rule.conditions),
        actions: compile_actions(&rule.actions, &rule.name)?,
        else_actions: compile_actions(&rule.else_actions, &rule.name)?,
        reads: reads_of(rule).into_iter().collect(),
        writes: writes_of(rule).into_iter().collect(),
    })
}

fn compile_group(group: &ConditionGroup) -> GroupPlan {
    let members = group
        .members
        .iter()
        .map(|m| match m {
            ConditionNode::Leaf(leaf) => compile_leaf(leaf),
            ConditionNode::Group(g) => CondPlan::Group(Box::new(compile_group(g))),
        })
        .collect();
    match group.kind {
        GroupKind::All => GroupPlan::All(members),
        GroupKind::Any => GroupPlan::Any(members),
    }
}

fn compile_leaf(leaf: &ConditionDecl) -> CondPlan {
    match leaf {
        ConditionDecl::Comparison { sensor, op, value } => CondPlan::Comparison {
            sensor: sensor.clone(),
            op: *op,
            value: value.clone(),
        },
        ConditionDecl::Expression { expr } => CondPlan::Expression { expr: expr.clone() },
        ConditionDecl::ThresholdOverTime {
            sensor,
            op,
            threshold,
            duration,
        } => CondPlan::Threshold {
            sensor: sensor.clone(),
            op: *op,
            threshold: *threshold,
            duration: *duration,
        },
    }
}

fn compile_actions(actions: &[ActionDecl], rule: &str) -> anyhow::Result<Vec<ActionPlan>> {
    actions.iter().map(|a| compile_action(a, rule)).collect()
}

fn compile_action(action: &ActionDecl, rule: &str) -> anyhow::Result<ActionPlan> {
    let resolve = |value: &Option<ScalarLit>,
                   expr: &Option<crate::ast::Expr>|
     -> anyhow::Result<ValuePlan> {
        match (value, expr) {
            (Some(lit), None) => Ok(ValuePlan::Literal(lit.clone())),
            (None, Some(e)) => Ok(ValuePlan::Expr(e.clone())),
            _ => anyhow::bail!("rule {rule:?}: action value not resolved by checker"),
        }
    };

    Ok(match action {
        ActionDecl::Set {
            key,
            value,
            value_expression,
            emit,
        } => ActionPlan::Set {
            key: key.clone(),
            value: resolve(value, value_expression)?,
            emit: *emit,
        },
        ActionDecl::Log { message, emit } => ActionPlan::Log {
            message: message.clone(),
            emit: *emit,
        },
        ActionDecl::Buffer {
            key,
            value,
            value_expression,
            max_items,
            emit,
        } => ActionPlan::Buffer {
            key: key.clone(),
            value: resolve(value, value_expression)?,
            max_items: *max_items,
            emit: *emit,
        },
        ActionDecl::SendMessage {
            channel,
            message,
            message_expression,
        } => ActionPlan::SendMessage {
            channel: channel.clone(),
            message: match (message, message_expression) {
                (Some(m), None) => ValuePlan::Literal(ScalarLit::Str(m.clone())),
                (None, Some(e)) => ValuePlan::Expr(e.clone()),
                _ => anyhow::bail!("rule {rule:?}: message not resolved by checker"),
            },
        },
    })
}
