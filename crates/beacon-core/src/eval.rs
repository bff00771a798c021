//! Plan evaluation for one cycle.
//!
//! Evaluation is single-threaded and deterministic: rules run in layer
//! order, see only the frozen snapshot (never each other's staged writes),
//! and stage all side effects into a [`WriteSet`] that the scheduler
//! commits at the cycle boundary. Cross-cycle memory (`on_enter` branches,
//! `on_change` baselines) lives in the evaluator and survives failed
//! commits, so changed values re-emit on the next successful cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use beacon_lang::ast::{EmitMode, FallbackPolicy};
use beacon_lang::plan::{ActionPlan, CondPlan, GroupPlan, RuleExec, RulePlan, ValuePlan};

use crate::expr::{EvalContext, compare_tagged, eval_expr, value_to_tri};
use crate::temporal::{TemporalBuffer, WindowMode};
use crate::tri::Tri;
use crate::value::{TaggedValue, value_to_string, values_equal};

// ---------------------------------------------------------------------------
// Cycle data
// ---------------------------------------------------------------------------

/// The frozen per-cycle view of the store.
#[derive(Debug, Clone, Default)]
pub struct CycleSnapshot {
    pub values: HashMap<String, TaggedValue>,
    /// Cycle timestamp (epoch milliseconds).
    pub at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedWrite {
    pub key: String,
    pub value: TaggedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedBufferAppend {
    pub key: String,
    pub value: TaggedValue,
    pub max_items: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedMessage {
    pub channel: String,
    pub body: String,
}

/// Everything a cycle wants to commit: `set` writes, buffered series
/// appends, and pub/sub messages in staging order.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    pub sets: Vec<StagedWrite>,
    pub buffers: Vec<StagedBufferAppend>,
    pub messages: Vec<StagedMessage>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.buffers.is_empty() && self.messages.is_empty()
    }

    /// Final key→value pairs to commit: last writer wins, first-write order
    /// preserved.
    pub fn final_sets(&self) -> Vec<(String, TaggedValue)> {
        let mut order: Vec<&str> = Vec::new();
        let mut last: HashMap<&str, &TaggedValue> = HashMap::new();
        for w in &self.sets {
            if !last.contains_key(w.key.as_str()) {
                order.push(&w.key);
            }
            last.insert(&w.key, &w.value);
        }
        order
            .into_iter()
            .map(|k| (k.to_string(), (*last[k]).clone()))
            .collect()
    }
}

/// Per-cycle evaluation statistics for the metrics layer.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    /// Rule name → condition outcome, in evaluation order.
    pub results: Vec<(String, Tri)>,
    /// Wall-clock spent evaluating each rule.
    pub durations: Vec<(String, std::time::Duration)>,
    /// Expression runtime faults (divide by zero, type mismatch) observed
    /// while all referenced sensors were available.
    pub expr_errors: u64,
    /// Same-key writes within one cycle (resolved last-writer-wins).
    pub write_conflicts: u64,
    /// `(rule, sensor, satisfied)` for every temporal leaf evaluated.
    pub window_states: Vec<(String, String, bool)>,
}

// ---------------------------------------------------------------------------
// Emit state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Primary,
    Alternate,
}

#[derive(Debug, Default)]
struct EmitState {
    /// Previous cycle's selected branch, per rule.
    branches: HashMap<String, Branch>,
    /// Last committed value per `set`/`buffer` key.
    committed: HashMap<String, TaggedValue>,
    /// Last emitted message per log action (`rule#index`).
    logged: HashMap<String, String>,
    /// Whether `on_change` baselines were seeded from a snapshot.
    seeded: bool,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Owns the emit state and executes the compiled plan, one cycle at a time.
pub struct Evaluator {
    plan: Arc<RulePlan>,
    emit: EmitState,
}

impl Evaluator {
    pub fn new(plan: Arc<RulePlan>) -> Self {
        Self {
            plan,
            emit: EmitState::default(),
        }
    }

    pub fn plan(&self) -> &Arc<RulePlan> {
        &self.plan
    }

    /// Evaluate every rule in layer order against the snapshot.
    pub fn evaluate(&mut self, snapshot: &CycleSnapshot, buffer: &TemporalBuffer) -> (WriteSet, EvalReport) {
        if !self.emit.seeded {
            self.seed_baselines(snapshot);
        }

        let plan = Arc::clone(&self.plan);
        let mut ws = WriteSet::default();
        let mut report = EvalReport::default();
        let mut staged_keys: HashSet<String> = HashSet::new();

        for layer in &plan.layers {
            for rule in &layer.rules {
                let started = std::time::Instant::now();
                self.evaluate_rule(rule, snapshot, buffer, &mut ws, &mut report, &mut staged_keys);
                report.durations.push((rule.name.clone(), started.elapsed()));
            }
        }
        (ws, report)
    }

    /// Advance `on_change` baselines after the scheduler committed `ws`.
    /// Not calling this (a failed commit) leaves the baselines alone, so
    /// the same values stage again next cycle.
    pub fn mark_committed(&mut self, ws: &WriteSet) {
        for (key, value) in ws.final_sets() {
            self.emit.committed.insert(key, value);
        }
        for append in &ws.buffers {
            self.emit
                .committed
                .insert(append.key.clone(), append.value.clone());
        }
    }

    /// Fill `on_change` baselines from the first snapshot after start, so a
    /// restart does not re-emit unchanged keys.
    fn seed_baselines(&mut self, snapshot: &CycleSnapshot) {
        for (key, value) in &snapshot.values {
            if key.starts_with("output:") && value.is_available() {
                self.emit
                    .committed
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        self.emit.seeded = true;
    }

    fn evaluate_rule(
        &mut self,
        rule: &RuleExec,
        snapshot: &CycleSnapshot,
        buffer: &TemporalBuffer,
        ws: &mut WriteSet,
        report: &mut EvalReport,
        staged_keys: &mut HashSet<String>,
    ) {
        // 1. Fallback resolution. A required input that stays unavailable
        // after its fallback decides the whole rule: the outcome is
        // Indeterminate and the condition group is not consulted. Optional
        // inputs (`required: false`) flow through three-valued logic.
        let mut overrides: HashMap<String, TaggedValue> = HashMap::new();
        let mut skip = false;
        let mut missing_required = false;
        for input in &rule.inputs {
            let present = snapshot
                .values
                .get(&input.id)
                .map(TaggedValue::is_available)
                .unwrap_or(false);
            if present {
                continue;
            }
            match &input.fallback {
                FallbackPolicy::UseDefault { default } => {
                    overrides.insert(input.id.clone(), TaggedValue::from(default));
                }
                FallbackPolicy::UseLastKnown { max_age } => {
                    if let Some(v) = buffer.last_within(&input.id, *max_age, snapshot.at_ms) {
                        overrides.insert(input.id.clone(), v);
                    }
                }
                FallbackPolicy::SkipRule => skip = true,
                _ => {}
            }
            if input.required && !overrides.contains_key(&input.id) {
                missing_required = true;
            }
        }
        if skip {
            report.results.push((rule.name.clone(), Tri::Indeterminate));
            return;
        }

        let ctx = EvalContext {
            snapshot: &snapshot.values,
            overrides: &overrides,
            now_ms: snapshot.at_ms,
        };

        // 2. Condition group under three-valued logic.
        let result = if missing_required {
            Tri::Indeterminate
        } else {
            self.eval_group(&rule.condition, &ctx, buffer, &rule.name, report)
        };
        report.results.push((rule.name.clone(), result));

        // 3. Branch selection: True → primary, otherwise the else block.
        let (branch, actions) = if result.is_true() {
            (Branch::Primary, &rule.actions)
        } else {
            (Branch::Alternate, &rule.else_actions)
        };
        let entered = self.emit.branches.get(&rule.name) != Some(&branch);
        self.emit.branches.insert(rule.name.clone(), branch);

        // 4. Actions in listed order, honouring emit modifiers.
        for (idx, action) in actions.iter().enumerate() {
            self.execute_action(action, idx, rule, &ctx, entered, ws, report, staged_keys);
        }
    }

    fn eval_group(
        &self,
        group: &GroupPlan,
        ctx: &EvalContext<'_>,
        buffer: &TemporalBuffer,
        rule: &str,
        report: &mut EvalReport,
    ) -> Tri {
        // An empty group evaluates true by definition.
        match group {
            GroupPlan::All(members) => {
                let mut acc = Tri::True;
                for member in members {
                    let v = self.eval_cond(member, ctx, buffer, rule, report);
                    acc = acc.and(v);
                    if acc == Tri::False {
                        break;
                    }
                }
                acc
            }
            GroupPlan::Any(members) => {
                if members.is_empty() {
                    return Tri::True;
                }
                let mut acc = Tri::False;
                for member in members {
                    let v = self.eval_cond(member, ctx, buffer, rule, report);
                    acc = acc.or(v);
                    if acc == Tri::True {
                        break;
                    }
                }
                acc
            }
        }
    }

    fn eval_cond(
        &self,
        cond: &CondPlan,
        ctx: &EvalContext<'_>,
        buffer: &TemporalBuffer,
        rule: &str,
        report: &mut EvalReport,
    ) -> Tri {
        match cond {
            CondPlan::Comparison { sensor, op, value } => {
                let left = ctx.lookup(&sensor.key).get_path(&sensor.path);
                compare_tagged(*op, &left, &TaggedValue::from(value))
            }
            CondPlan::Expression { expr } => {
                let out = eval_expr(expr, ctx);
                match out {
                    TaggedValue::Bool(b) => Tri::from(b),
                    TaggedValue::Str(_) => {
                        // Flexible boolean strings count; anything else is a
                        // type fault.
                        let tri = value_to_tri(&out);
                        if tri == Tri::Indeterminate {
                            report.expr_errors += 1;
                        }
                        tri
                    }
                    TaggedValue::Unavailable => {
                        if expr_refs_available(expr, ctx) {
                            report.expr_errors += 1;
                        }
                        Tri::Indeterminate
                    }
                    _ => {
                        report.expr_errors += 1;
                        Tri::Indeterminate
                    }
                }
            }
            CondPlan::Threshold {
                sensor,
                op,
                threshold,
                duration,
            } => {
                let out = buffer.satisfies_threshold_for(
                    sensor,
                    *op,
                    *threshold,
                    *duration,
                    WindowMode::Strict,
                    ctx.now_ms,
                );
                report
                    .window_states
                    .push((rule.to_string(), sensor.clone(), out.is_true()));
                out
            }
            CondPlan::Group(inner) => self.eval_group(inner, ctx, buffer, rule, report),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_action(
        &mut self,
        action: &ActionPlan,
        idx: usize,
        rule: &RuleExec,
        ctx: &EvalContext<'_>,
        entered: bool,
        ws: &mut WriteSet,
        report: &mut EvalReport,
        staged_keys: &mut HashSet<String>,
    ) {
        match action {
            ActionPlan::Set { key, value, emit } => {
                if *emit == EmitMode::OnEnter && !entered {
                    return;
                }
                let Some(v) = self.resolve_value(value, ctx, report) else {
                    return;
                };
                if *emit == EmitMode::OnChange
                    && let Some(prev) = self.emit.committed.get(key)
                    && values_equal(prev, &v)
                {
                    return;
                }
                if !staged_keys.insert(key.clone()) {
                    report.write_conflicts += 1;
                    log::warn!("rule {}: key {key:?} written more than once this cycle", rule.name);
                }
                ws.sets.push(StagedWrite {
                    key: key.clone(),
                    value: v,
                });
            }
            ActionPlan::Buffer {
                key,
                value,
                max_items,
                emit,
            } => {
                if *emit == EmitMode::OnEnter && !entered {
                    return;
                }
                let Some(v) = self.resolve_value(value, ctx, report) else {
                    return;
                };
                if *emit == EmitMode::OnChange
                    && let Some(prev) = self.emit.committed.get(key)
                    && values_equal(prev, &v)
                {
                    return;
                }
                ws.buffers.push(StagedBufferAppend {
                    key: key.clone(),
                    value: v,
                    max_items: *max_items,
                });
            }
            ActionPlan::Log { message, emit } => {
                let slot = format!("{}#{idx}", rule.name);
                match emit {
                    EmitMode::OnEnter if !entered => return,
                    EmitMode::OnChange
                        if self.emit.logged.get(&slot).map(String::as_str)
                            == Some(message.as_str()) =>
                    {
                        return;
                    }
                    _ => {}
                }
                self.emit.logged.insert(slot, message.clone());
                log::info!("rule {}: {message}", rule.name);
            }
            ActionPlan::SendMessage { channel, message } => {
                let Some(v) = self.resolve_value(message, ctx, report) else {
                    return;
                };
                ws.messages.push(StagedMessage {
                    channel: channel.clone(),
                    body: value_to_string(&v),
                });
            }
        }
    }

    /// Evaluate a value plan; `None` (skipped) when the result is
    /// unavailable. A fault with all referenced sensors available counts as
    /// an expression error.
    fn resolve_value(
        &self,
        value: &ValuePlan,
        ctx: &EvalContext<'_>,
        report: &mut EvalReport,
    ) -> Option<TaggedValue> {
        match value {
            ValuePlan::Literal(lit) => Some(TaggedValue::from(lit)),
            ValuePlan::Expr(expr) => {
                let v = eval_expr(expr, ctx);
                if v.is_available() {
                    Some(v)
                } else {
                    if expr_refs_available(expr, ctx) {
                        report.expr_errors += 1;
                    }
                    None
                }
            }
        }
    }
}

/// True when every sensor the expression references resolves to an
/// available value; distinguishes runtime faults from missing data.
fn expr_refs_available(expr: &beacon_lang::ast::Expr, ctx: &EvalContext<'_>) -> bool {
    let mut keys = Vec::new();
    expr.sensor_keys(&mut keys);
    keys.iter().all(|k| ctx.lookup(k).is_available())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_lang::compiler::{CompileOptions, compile};
    use beacon_lang::dsl::parse_rules;

    fn make_evaluator(text: &str) -> Evaluator {
        let file = parse_rules(text).unwrap();
        let out = compile(&file, &CompileOptions::default()).unwrap();
        Evaluator::new(Arc::new(out.plan))
    }

    fn snapshot(at_ms: i64, values: &[(&str, TaggedValue)]) -> CycleSnapshot {
        CycleSnapshot {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            at_ms,
        }
    }

    fn empty_buffer() -> TemporalBuffer {
        TemporalBuffer::new(&[], 16)
    }

    const THRESHOLD_RULE: &str = r#"
rules:
  - name: high_temp
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: ">"
          value: 30
    actions:
      - type: set
        key: output:high_temperature
        value: true
"#;

    #[test]
    fn simple_threshold_fires_only_above() {
        let mut ev = make_evaluator(THRESHOLD_RULE);
        let buf = empty_buffer();

        let (ws, report) = ev.evaluate(
            &snapshot(0, &[("input:temperature", TaggedValue::Number(25.0))]),
            &buf,
        );
        assert!(ws.sets.is_empty());
        assert_eq!(report.results[0].1, Tri::False);

        let (ws, report) = ev.evaluate(
            &snapshot(100, &[("input:temperature", TaggedValue::Number(35.0))]),
            &buf,
        );
        assert_eq!(
            ws.final_sets(),
            vec![(
                "output:high_temperature".to_string(),
                TaggedValue::Bool(true)
            )]
        );
        assert_eq!(report.results[0].1, Tri::True);
    }

    #[test]
    fn staged_writes_are_invisible_within_the_cycle() {
        let text = r#"
rules:
  - name: normalize
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: ">"
          value: -1000
    actions:
      - type: set
        key: output:normalized
        value_expression: "input:temperature / 100"
  - name: alert_level
    conditions:
      all:
        - type: comparison
          sensor: output:normalized
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:alert_level
        value_expression: "output:normalized * 10"
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();

        // Cycle N: only the input exists; normalize stages its write but
        // alert_level must not see it.
        let (ws, report) = ev.evaluate(
            &snapshot(0, &[("input:temperature", TaggedValue::Number(30.0))]),
            &buf,
        );
        assert_eq!(
            ws.final_sets(),
            vec![("output:normalized".to_string(), TaggedValue::Number(0.3))]
        );
        let alert = report.results.iter().find(|(r, _)| r == "alert_level").unwrap();
        assert_eq!(alert.1, Tri::Indeterminate);

        // Cycle N+1: the committed value is now in the snapshot.
        let (ws, _) = ev.evaluate(
            &snapshot(
                100,
                &[
                    ("input:temperature", TaggedValue::Number(30.0)),
                    ("output:normalized", TaggedValue::Number(0.3)),
                ],
            ),
            &buf,
        );
        assert!(
            ws.final_sets()
                .iter()
                .any(|(k, v)| k == "output:alert_level" && *v == TaggedValue::Number(3.0))
        );
    }

    #[test]
    fn on_change_emits_only_transitions() {
        let text = r#"
rules:
  - name: fan
    conditions:
      all:
        - type: expression
          expression: "true"
    actions:
      - type: set
        key: output:fan_state
        value_expression: "input:switch"
        emit: on_change
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let seq = ["on", "on", "off", "off"];
        let mut commits = Vec::new();
        for (i, s) in seq.iter().enumerate() {
            let (ws, _) = ev.evaluate(
                &snapshot(
                    i as i64 * 100,
                    &[("input:switch", TaggedValue::Str(s.to_string()))],
                ),
                &buf,
            );
            commits.push(ws.final_sets());
            ev.mark_committed(&ws);
        }
        assert_eq!(commits[0].len(), 1);
        assert!(commits[1].is_empty());
        assert_eq!(commits[2].len(), 1);
        assert!(commits[3].is_empty());
    }

    #[test]
    fn on_change_re_emits_after_failed_commit() {
        let text = r#"
rules:
  - name: fan
    conditions:
      all:
        - type: expression
          expression: "true"
    actions:
      - type: set
        key: output:fan_state
        value_expression: "input:switch"
        emit: on_change
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let snap = snapshot(0, &[("input:switch", TaggedValue::Str("on".to_string()))]);

        let (ws, _) = ev.evaluate(&snap, &buf);
        assert_eq!(ws.final_sets().len(), 1);
        // Commit failed: mark_committed not called. The write stages again.
        let (ws, _) = ev.evaluate(&snap, &buf);
        assert_eq!(ws.final_sets().len(), 1);
        ev.mark_committed(&ws);
        let (ws, _) = ev.evaluate(&snap, &buf);
        assert!(ws.final_sets().is_empty());
    }

    #[test]
    fn on_enter_stages_only_on_branch_transition() {
        let text = r#"
rules:
  - name: alarm
    conditions:
      all:
        - type: comparison
          sensor: input:level
          operator: ">"
          value: 10
    actions:
      - type: send_message
        channel: alerts
        message: "level high"
      - type: set
        key: output:alarm_mark
        value: 1
        emit: on_enter
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();

        let high = snapshot(0, &[("input:level", TaggedValue::Number(20.0))]);
        let low = snapshot(0, &[("input:level", TaggedValue::Number(0.0))]);

        let (ws, _) = ev.evaluate(&high, &buf);
        assert_eq!(ws.sets.len(), 1);
        assert_eq!(ws.messages.len(), 1);

        // Same branch again: on_enter suppressed, send_message is not.
        let (ws, _) = ev.evaluate(&high, &buf);
        assert!(ws.sets.is_empty());
        assert_eq!(ws.messages.len(), 1);

        // Leave and re-enter.
        let (_, _) = ev.evaluate(&low, &buf);
        let (ws, _) = ev.evaluate(&high, &buf);
        assert_eq!(ws.sets.len(), 1);
    }

    #[test]
    fn indeterminate_selects_else_branch() {
        let text = r#"
rules:
  - name: guard
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
        - type: comparison
          sensor: input:b
          operator: "=="
          value: true
    actions:
      - type: set
        key: output:ok
        value: true
    else:
      - type: set
        key: output:ok
        value: false
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();

        // input:a unavailable, input:b true → Indeterminate → else fires.
        let (ws, report) = ev.evaluate(
            &snapshot(0, &[("input:b", TaggedValue::Bool(true))]),
            &buf,
        );
        assert_eq!(report.results[0].1, Tri::Indeterminate);
        assert_eq!(
            ws.final_sets(),
            vec![("output:ok".to_string(), TaggedValue::Bool(false))]
        );
    }

    #[test]
    fn skip_rule_fallback_short_circuits() {
        let text = r#"
rules:
  - name: guarded
    inputs:
      - id: input:a
        fallback:
          strategy: skip_rule
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:x
        value: 1
    else:
      - type: set
        key: output:x
        value: 0
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let (ws, report) = ev.evaluate(&snapshot(0, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::Indeterminate);
        // Neither branch fires on skip.
        assert!(ws.is_empty());
    }

    #[test]
    fn missing_required_input_gates_the_rule() {
        let text = r#"
rules:
  - name: gated
    inputs:
      - input:a
    conditions:
      any:
        - type: comparison
          sensor: input:b
          operator: ">"
          value: 0
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:x
        value: 1
    else:
      - type: set
        key: output:x
        value: 0
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();

        // input:a is required and missing: the satisfied disjunct on
        // input:b must not rescue the rule.
        let (ws, report) = ev.evaluate(
            &snapshot(0, &[("input:b", TaggedValue::Number(5.0))]),
            &buf,
        );
        assert_eq!(report.results[0].1, Tri::Indeterminate);
        assert_eq!(
            ws.final_sets(),
            vec![("output:x".to_string(), TaggedValue::Number(0.0))]
        );
    }

    #[test]
    fn optional_input_leaves_evaluation_to_the_group() {
        let text = r#"
rules:
  - name: lenient
    inputs:
      - id: input:a
        required: false
    conditions:
      any:
        - type: comparison
          sensor: input:b
          operator: ">"
          value: 0
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:x
        value: 1
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();

        // Same shape as the required case, but input:a is optional: the
        // any-group fires on input:b alone.
        let (ws, report) = ev.evaluate(
            &snapshot(0, &[("input:b", TaggedValue::Number(5.0))]),
            &buf,
        );
        assert_eq!(report.results[0].1, Tri::True);
        assert_eq!(
            ws.final_sets(),
            vec![("output:x".to_string(), TaggedValue::Number(1.0))]
        );
    }

    #[test]
    fn use_default_fallback_substitutes() {
        let text = r#"
rules:
  - name: defaulted
    inputs:
      - id: input:a
        fallback:
          strategy: use_default
          default: 42
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 10
    actions:
      - type: set
        key: output:x
        value: 1
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let (ws, report) = ev.evaluate(&snapshot(0, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::True);
        assert_eq!(ws.final_sets().len(), 1);
    }

    #[test]
    fn use_last_known_respects_max_age() {
        let text = r#"
rules:
  - name: held
    inputs:
      - id: input:a
        fallback:
          strategy: use_last_known
          max_age: 1s
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:x
        value: 1
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        buf.append("input:a", TaggedValue::Number(5.0), 0);

        // Within max_age: last known value substitutes.
        let (_, report) = ev.evaluate(&snapshot(500, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::True);

        // Beyond max_age: unavailable again.
        let (_, report) = ev.evaluate(&snapshot(5_000, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::Indeterminate);
    }

    #[test]
    fn same_key_writes_count_conflicts_and_last_writer_wins() {
        let text = r#"
rules:
  - name: racy
    conditions:
      all:
        - type: expression
          expression: "true"
    actions:
      - type: set
        key: output:x
        value_expression: "input:a"
      - type: set
        key: output:x
        value_expression: "input:a + 1"
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let (ws, report) = ev.evaluate(
            &snapshot(0, &[("input:a", TaggedValue::Number(1.0))]),
            &buf,
        );
        assert_eq!(report.write_conflicts, 1);
        assert_eq!(
            ws.final_sets(),
            vec![("output:x".to_string(), TaggedValue::Number(2.0))]
        );
    }

    #[test]
    fn expression_fault_counts_and_stays_contained() {
        let text = r#"
rules:
  - name: faulty
    conditions:
      all:
        - type: expression
          expression: "input:a / input:b > 1"
    actions:
      - type: set
        key: output:x
        value: 1
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let (ws, report) = ev.evaluate(
            &snapshot(
                0,
                &[
                    ("input:a", TaggedValue::Number(1.0)),
                    ("input:b", TaggedValue::Number(0.0)),
                ],
            ),
            &buf,
        );
        assert_eq!(report.results[0].1, Tri::Indeterminate);
        assert_eq!(report.expr_errors, 1);
        assert!(ws.is_empty());
    }

    #[test]
    fn sustained_threshold_over_buffer() {
        let text = r#"
rules:
  - name: sustained
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temperature
          operator: ">"
          threshold: 75
          duration: 10s
    actions:
      - type: set
        key: output:sustained_high
        value: true
    else:
      - type: set
        key: output:sustained_high
        value: false
"#;
        let mut ev = make_evaluator(text);
        let buf = TemporalBuffer::new(&[], 64);

        // 11 consecutive satisfying samples, 1 s apart.
        for i in 0..11i64 {
            buf.append("input:temperature", TaggedValue::Number(76.0), i * 1_000);
        }
        let (ws, report) = ev.evaluate(&snapshot(10_000, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::True);
        assert_eq!(
            ws.final_sets(),
            vec![(
                "output:sustained_high".to_string(),
                TaggedValue::Bool(true)
            )]
        );
        assert_eq!(
            report.window_states,
            vec![("sustained".to_string(), "input:temperature".to_string(), true)]
        );

        // One violating sample resets the window.
        buf.append("input:temperature", TaggedValue::Number(74.0), 11_000);
        let (ws, report) = ev.evaluate(&snapshot(11_000, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::False);
        assert_eq!(
            ws.final_sets(),
            vec![(
                "output:sustained_high".to_string(),
                TaggedValue::Bool(false)
            )]
        );
    }

    #[test]
    fn all_inputs_unavailable_suppresses_primary_actions() {
        let text = r#"
rules:
  - name: r
    inputs:
      - input:a
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:fired
        value: true
      - type: send_message
        channel: alerts
        message: fired
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let (ws, report) = ev.evaluate(&snapshot(0, &[]), &buf);
        assert_eq!(report.results[0].1, Tri::Indeterminate);
        assert!(ws.is_empty());
    }

    #[test]
    fn restart_baselines_seed_from_first_snapshot() {
        let text = r#"
rules:
  - name: fan
    conditions:
      all:
        - type: expression
          expression: "true"
    actions:
      - type: set
        key: output:fan_state
        value_expression: "input:switch"
        emit: on_change
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        // The store already holds the value this rule would write.
        let (ws, _) = ev.evaluate(
            &snapshot(
                0,
                &[
                    ("input:switch", TaggedValue::Str("on".to_string())),
                    ("output:fan_state", TaggedValue::Str("on".to_string())),
                ],
            ),
            &buf,
        );
        assert!(ws.final_sets().is_empty(), "unchanged value must not re-emit");
    }

    #[test]
    fn messages_stage_in_action_order() {
        let text = r#"
rules:
  - name: pub
    conditions:
      all:
        - type: expression
          expression: "true"
    actions:
      - type: set
        key: output:k
        value: 1
      - type: send_message
        channel: alerts
        message: first
      - type: send_message
        channel: alerts
        message: second
"#;
        let mut ev = make_evaluator(text);
        let buf = empty_buffer();
        let (ws, _) = ev.evaluate(&snapshot(0, &[]), &buf);
        assert_eq!(
            ws.messages,
            vec![
                StagedMessage {
                    channel: "alerts".to_string(),
                    body: "first".to_string()
                },
                StagedMessage {
                    channel: "alerts".to_string(),
                    body: "second".to_string()
                },
            ]
        );
    }
}
