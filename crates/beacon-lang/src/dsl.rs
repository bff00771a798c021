//! YAML/JSON rule document front end.
//!
//! Deserializes into a raw serde model (strict about unknown fields), then
//! lowers into the typed AST: operator synonyms fold to canonical forms,
//! durations normalize to milliseconds, and both the wrapped
//! (`{condition: {...}}`) and direct (`{type: ...}`) condition forms produce
//! the same tree.

use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value as Yaml;

use crate::ast::{
    ActionDecl, CmpOp, ConditionDecl, ConditionGroup, ConditionNode, EmitMode, Expr,
    FallbackPolicy, GroupKind, InputDecl, RuleDecl, RuleFile, ScalarLit, SensorRef,
};
use crate::expr::parse_expr_str;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by the rule document front end.
///
/// `Syntax` means the text is not well-formed YAML/JSON at all; `Parse`
/// means it is well-formed but does not describe a valid rule document
/// (unknown fields, wrong shapes, bad operators or durations).
#[derive(Debug, thiserror::Error)]
pub enum DslError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("parse error: {0}")]
    Parse(String),
}

type DslResult<T> = Result<T, DslError>;

fn parse_err(msg: impl Into<String>) -> DslError {
    DslError::Parse(msg.into())
}

// ---------------------------------------------------------------------------
// Raw serde model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    version: Option<String>,
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    name: String,
    description: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    inputs: Option<Vec<RawInput>>,
    conditions: Yaml,
    actions: Vec<RawAction>,
    #[serde(rename = "else")]
    else_actions: Option<Vec<RawAction>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInput {
    Id(String),
    Full(RawInputFull),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInputFull {
    id: String,
    #[serde(default = "default_true")]
    required: bool,
    fallback: Option<RawFallback>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFallback {
    strategy: String,
    default: Option<RawScalar>,
    max_age: Option<RawDuration>,
}

/// One condition leaf, either form. Kept flat with a `type` discriminator so
/// unknown fields surface with their serde path intact.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    r#type: String,
    sensor: Option<String>,
    property: Option<String>,
    operator: Option<String>,
    value: Option<RawScalar>,
    expression: Option<String>,
    threshold: Option<f64>,
    duration: Option<RawDuration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    r#type: String,
    key: Option<String>,
    value: Option<RawScalar>,
    value_expression: Option<String>,
    emit: Option<String>,
    message: Option<String>,
    message_expression: Option<String>,
    channel: Option<String>,
    max_items: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawScalar {
    fn lower(self) -> ScalarLit {
        match self {
            RawScalar::Bool(b) => ScalarLit::Bool(b),
            RawScalar::Int(i) => ScalarLit::Number(i as f64),
            RawScalar::Float(f) => ScalarLit::Number(f),
            RawScalar::Str(s) => ScalarLit::Str(s),
        }
    }
}

/// A duration: bare integer = milliseconds, or a string with an
/// `ms`/`s`/`m`/`h` suffix.
#[derive(Debug)]
struct RawDuration(Duration);

impl<'de> Deserialize<'de> for RawDuration {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let v = Yaml::deserialize(deserializer)?;
        match v {
            Yaml::Number(n) => {
                let ms = n
                    .as_u64()
                    .ok_or_else(|| D::Error::custom(format!("duration must be a non-negative integer, got {n}")))?;
                Ok(RawDuration(Duration::from_millis(ms)))
            }
            Yaml::String(s) => parse_duration_str(&s).map(RawDuration).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "duration must be an integer (ms) or suffixed string, got {other:?}"
            ))),
        }
    }
}

/// Parse `"500ms"`, `"10s"`, `"5m"`, `"2h"`, or bare digits (milliseconds).
pub fn parse_duration_str(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if split == 0 {
        anyhow::bail!("duration {s:?} has no numeric part");
    }
    let value: u64 = s[..split]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid number in duration {s:?}"))?;
    let millis = match &s[split..] {
        "" | "ms" => value,
        "s" => value * 1_000,
        "m" => value * 60_000,
        "h" => value * 3_600_000,
        suffix => anyhow::bail!("unsupported duration suffix {suffix:?} in {s:?} (expected ms/s/m/h)"),
    };
    Ok(Duration::from_millis(millis))
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse a YAML or JSON rule document into a typed [`RuleFile`].
pub fn parse_rules(text: &str) -> DslResult<RuleFile> {
    let doc: Yaml = serde_yaml::from_str(text).map_err(|e| DslError::Syntax(e.to_string()))?;
    let raw: RawFile =
        serde_yaml::from_value(doc).map_err(|e| DslError::Parse(e.to_string()))?;

    if let Some(ref v) = raw.version
        && v != "1"
    {
        return Err(parse_err(format!("unsupported document version {v:?}")));
    }

    let mut rules = Vec::with_capacity(raw.rules.len());
    for raw_rule in raw.rules {
        rules.push(lower_rule(raw_rule)?);
    }
    Ok(RuleFile {
        version: raw.version,
        rules,
    })
}

// ---------------------------------------------------------------------------
// Rule lowering
// ---------------------------------------------------------------------------

fn lower_rule(raw: RawRule) -> DslResult<RuleDecl> {
    let name = raw.name;
    if !is_valid_rule_name(&name) {
        return Err(parse_err(format!(
            "rule name {name:?} does not match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }

    let inputs = raw
        .inputs
        .unwrap_or_default()
        .into_iter()
        .map(|i| lower_input(i, &name))
        .collect::<DslResult<Vec<_>>>()?;

    let conditions = lower_group(&raw.conditions, &name)?;

    let actions = raw
        .actions
        .into_iter()
        .map(|a| lower_action(a, &name))
        .collect::<DslResult<Vec<_>>>()?;
    let else_actions = raw
        .else_actions
        .unwrap_or_default()
        .into_iter()
        .map(|a| lower_action(a, &name))
        .collect::<DslResult<Vec<_>>>()?;

    Ok(RuleDecl {
        name,
        description: raw.description,
        enabled: raw.enabled,
        inputs,
        conditions,
        actions,
        else_actions,
    })
}

fn is_valid_rule_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn lower_input(raw: RawInput, rule: &str) -> DslResult<InputDecl> {
    match raw {
        RawInput::Id(id) => Ok(InputDecl {
            id,
            required: true,
            fallback: FallbackPolicy::PropagateUnavailable,
        }),
        RawInput::Full(full) => {
            let fallback = match full.fallback {
                None => FallbackPolicy::PropagateUnavailable,
                Some(fb) => lower_fallback(fb, &full.id, rule)?,
            };
            Ok(InputDecl {
                id: full.id,
                required: full.required,
                fallback,
            })
        }
    }
}

fn lower_fallback(raw: RawFallback, input: &str, rule: &str) -> DslResult<FallbackPolicy> {
    match raw.strategy.as_str() {
        "propagate_unavailable" => Ok(FallbackPolicy::PropagateUnavailable),
        "use_default" => {
            let default = raw.default.ok_or_else(|| {
                parse_err(format!(
                    "rule {rule:?} input {input:?}: use_default requires a `default` value"
                ))
            })?;
            Ok(FallbackPolicy::UseDefault {
                default: default.lower(),
            })
        }
        "use_last_known" => {
            let max_age = raw.max_age.ok_or_else(|| {
                parse_err(format!(
                    "rule {rule:?} input {input:?}: use_last_known requires `max_age`"
                ))
            })?;
            Ok(FallbackPolicy::UseLastKnown { max_age: max_age.0 })
        }
        "skip_rule" => Ok(FallbackPolicy::SkipRule),
        other => Err(parse_err(format!(
            "rule {rule:?} input {input:?}: unknown fallback strategy {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Condition lowering
// ---------------------------------------------------------------------------

/// Lower a `conditions` mapping: exactly one of `all`/`any`, each entry a
/// wrapped leaf, a direct leaf, or a nested group.
fn lower_group(value: &Yaml, rule: &str) -> DslResult<ConditionGroup> {
    let map = value
        .as_mapping()
        .ok_or_else(|| parse_err(format!("rule {rule:?}: conditions must be a mapping")))?;

    let all = map.get("all");
    let any = map.get("any");
    let (kind, entries) = match (all, any) {
        (Some(v), None) => (GroupKind::All, v),
        (None, Some(v)) => (GroupKind::Any, v),
        (Some(_), Some(_)) => {
            return Err(parse_err(format!(
                "rule {rule:?}: condition group has both `all` and `any`"
            )));
        }
        (None, None) => {
            return Err(parse_err(format!(
                "rule {rule:?}: condition group needs `all` or `any`"
            )));
        }
    };
    if map.len() != 1 {
        let extras: Vec<String> = map
            .keys()
            .filter_map(|k| k.as_str())
            .filter(|k| *k != "all" && *k != "any")
            .map(|k| k.to_string())
            .collect();
        return Err(parse_err(format!(
            "rule {rule:?}: unknown condition group field(s) {extras:?}"
        )));
    }

    let seq = entries.as_sequence().ok_or_else(|| {
        parse_err(format!("rule {rule:?}: condition group body must be a list"))
    })?;

    let mut members = Vec::with_capacity(seq.len());
    for entry in seq {
        members.push(lower_group_entry(entry, rule)?);
    }
    Ok(ConditionGroup { kind, members })
}

fn lower_group_entry(entry: &Yaml, rule: &str) -> DslResult<ConditionNode> {
    let map = entry
        .as_mapping()
        .ok_or_else(|| parse_err(format!("rule {rule:?}: condition entry must be a mapping")))?;

    // Wrapped form: { condition: {...} }
    if let Some(inner) = map.get("condition") {
        if map.len() != 1 {
            return Err(parse_err(format!(
                "rule {rule:?}: wrapped condition carries extra fields"
            )));
        }
        return lower_leaf(inner, rule).map(ConditionNode::Leaf);
    }

    // Nested group: { all: [...] } / { any: [...] }
    if map.contains_key("all") || map.contains_key("any") {
        return lower_group(entry, rule).map(ConditionNode::Group);
    }

    // Direct form: { type: ..., ... }
    lower_leaf(entry, rule).map(ConditionNode::Leaf)
}

fn lower_leaf(value: &Yaml, rule: &str) -> DslResult<ConditionDecl> {
    let raw: RawCondition = serde_yaml::from_value(value.clone())
        .map_err(|e| parse_err(format!("rule {rule:?}: {e}")))?;

    match raw.r#type.as_str() {
        "comparison" => {
            let sensor = raw.sensor.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: comparison needs `sensor`"))
            })?;
            let op_str = raw.operator.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: comparison needs `operator`"))
            })?;
            let op = normalize_operator(&op_str).ok_or_else(|| {
                parse_err(format!("rule {rule:?}: unknown operator {op_str:?}"))
            })?;
            let value = raw
                .value
                .ok_or_else(|| parse_err(format!("rule {rule:?}: comparison needs `value`")))?
                .lower();
            let path = raw
                .property
                .map(|p| p.split('.').map(str::to_string).collect())
                .unwrap_or_default();
            Ok(ConditionDecl::Comparison {
                sensor: SensorRef { key: sensor, path },
                op,
                value,
            })
        }
        "expression" => {
            let src = raw.expression.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: expression condition needs `expression`"))
            })?;
            let expr = parse_expr_str(&src)
                .map_err(|e| parse_err(format!("rule {rule:?}: {e}")))?;
            Ok(ConditionDecl::Expression { expr })
        }
        "threshold_over_time" => {
            let sensor = raw.sensor.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: threshold_over_time needs `sensor`"))
            })?;
            let op_str = raw.operator.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: threshold_over_time needs `operator`"))
            })?;
            let op = normalize_operator(&op_str).ok_or_else(|| {
                parse_err(format!("rule {rule:?}: unknown operator {op_str:?}"))
            })?;
            let threshold = raw.threshold.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: threshold_over_time needs `threshold`"))
            })?;
            let duration = raw.duration.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: threshold_over_time needs `duration`"))
            })?;
            Ok(ConditionDecl::ThresholdOverTime {
                sensor,
                op,
                threshold,
                duration: duration.0,
            })
        }
        other => Err(parse_err(format!(
            "rule {rule:?}: unknown condition type {other:?}"
        ))),
    }
}

/// Fold operator synonyms to canonical [`CmpOp`] forms.
pub fn normalize_operator(s: &str) -> Option<CmpOp> {
    match s.trim().to_ascii_lowercase().as_str() {
        ">" | "gt" | "greater_than" => Some(CmpOp::Gt),
        ">=" | "ge" | "gte" | "greater_than_or_equal" => Some(CmpOp::Ge),
        "<" | "lt" | "less_than" => Some(CmpOp::Lt),
        "<=" | "le" | "lte" | "less_than_or_equal" => Some(CmpOp::Le),
        "==" | "=" | "eq" | "equal" | "equals" => Some(CmpOp::Eq),
        "!=" | "ne" | "neq" | "not_equal" | "not_equals" => Some(CmpOp::Ne),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Action lowering
// ---------------------------------------------------------------------------

fn lower_action(raw: RawAction, rule: &str) -> DslResult<ActionDecl> {
    let emit = match raw.emit.as_deref() {
        None | Some("always") => EmitMode::Always,
        Some("on_change") => EmitMode::OnChange,
        Some("on_enter") => EmitMode::OnEnter,
        Some(other) => {
            return Err(parse_err(format!(
                "rule {rule:?}: unknown emit mode {other:?}"
            )));
        }
    };

    let parse_opt_expr = |src: Option<String>| -> DslResult<Option<Expr>> {
        src.map(|s| parse_expr_str(&s).map_err(|e| parse_err(format!("rule {rule:?}: {e}"))))
            .transpose()
    };

    match raw.r#type.as_str() {
        "set" => Ok(ActionDecl::Set {
            key: raw.key.unwrap_or_default(),
            value: raw.value.map(RawScalar::lower),
            value_expression: parse_opt_expr(raw.value_expression)?,
            emit,
        }),
        "log" => {
            let message = raw.message.ok_or_else(|| {
                parse_err(format!("rule {rule:?}: log action needs `message`"))
            })?;
            Ok(ActionDecl::Log { message, emit })
        }
        "buffer" => Ok(ActionDecl::Buffer {
            key: raw.key.unwrap_or_default(),
            value: raw.value.map(RawScalar::lower),
            value_expression: parse_opt_expr(raw.value_expression)?,
            max_items: raw.max_items.unwrap_or(1000),
            emit,
        }),
        "send_message" => Ok(ActionDecl::SendMessage {
            channel: raw.channel.unwrap_or_default(),
            message: raw.message,
            message_expression: parse_opt_expr(raw.message_expression)?,
        }),
        other => Err(parse_err(format!(
            "rule {rule:?}: unknown action type {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
version: "1"
rules:
  - name: high_temp
    description: flag high temperature
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
    fn parse_simple_rule() {
        let file = parse_rules(SIMPLE).unwrap();
        assert_eq!(file.version.as_deref(), Some("1"));
        assert_eq!(file.rules.len(), 1);
        let rule = &file.rules[0];
        assert_eq!(rule.name, "high_temp");
        assert!(rule.enabled);
        assert_eq!(rule.conditions.kind, GroupKind::All);
        match &rule.conditions.members[0] {
            ConditionNode::Leaf(ConditionDecl::Comparison { sensor, op, value }) => {
                assert_eq!(sensor.key, "input:temperature");
                assert_eq!(*op, CmpOp::Gt);
                assert_eq!(*value, ScalarLit::Number(30.0));
            }
            other => panic!("unexpected condition: {other:?}"),
        }
        match &rule.actions[0] {
            ActionDecl::Set { key, value, emit, .. } => {
                assert_eq!(key, "output:high_temperature");
                assert_eq!(*value, Some(ScalarLit::Bool(true)));
                assert_eq!(*emit, EmitMode::Always);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn wrapped_and_direct_forms_lower_identically() {
        let wrapped = r#"
rules:
  - name: r
    conditions:
      all:
        - condition:
            type: comparison
            sensor: input:a
            operator: gt
            value: 1
    actions:
      - type: log
        message: hit
"#;
        let direct = r#"
rules:
  - name: r
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 1
    actions:
      - type: log
        message: hit
"#;
        let a = parse_rules(wrapped).unwrap();
        let b = parse_rules(direct).unwrap();
        assert_eq!(a.rules[0].conditions, b.rules[0].conditions);
    }

    #[test]
    fn operator_synonyms_fold() {
        for (syn, want) in [
            ("greater_than", CmpOp::Gt),
            ("gte", CmpOp::Ge),
            ("eq", CmpOp::Eq),
            ("=", CmpOp::Eq),
            ("not_equal", CmpOp::Ne),
            ("LT", CmpOp::Lt),
        ] {
            assert_eq!(normalize_operator(syn), Some(want), "synonym {syn}");
        }
        assert_eq!(normalize_operator("~="), None);
    }

    #[test]
    fn durations_normalize_to_millis() {
        assert_eq!(parse_duration_str("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration_str("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration_str("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration_str("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration_str("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration_str("10d").is_err());
        assert!(parse_duration_str("s").is_err());
    }

    #[test]
    fn threshold_over_time_parses() {
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
"#;
        let file = parse_rules(text).unwrap();
        match &file.rules[0].conditions.members[0] {
            ConditionNode::Leaf(ConditionDecl::ThresholdOverTime {
                sensor,
                op,
                threshold,
                duration,
            }) => {
                assert_eq!(sensor, "input:temperature");
                assert_eq!(*op, CmpOp::Gt);
                assert_eq!(*threshold, 75.0);
                assert_eq!(*duration, Duration::from_secs(10));
            }
            other => panic!("unexpected condition: {other:?}"),
        }
    }

    #[test]
    fn unknown_rule_field_is_parse_error() {
        let text = SIMPLE.replace("description:", "descriptoin:");
        match parse_rules(&text) {
            Err(DslError::Parse(msg)) => assert!(msg.contains("descriptoin"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_condition_field_is_parse_error() {
        let text = SIMPLE.replace("          value: 30", "          value: 30\n          fuzz: 1");
        assert!(matches!(parse_rules(&text), Err(DslError::Parse(_))));
    }

    #[test]
    fn malformed_yaml_is_syntax_error() {
        assert!(matches!(
            parse_rules("rules:\n  - name: [unclosed"),
            Err(DslError::Syntax(_))
        ));
    }

    #[test]
    fn json_documents_are_accepted() {
        let json = r#"{"rules":[{"name":"r","conditions":{"all":[{"type":"comparison","sensor":"input:a","operator":">","value":1}]},"actions":[{"type":"log","message":"hi"}]}]}"#;
        let file = parse_rules(json).unwrap();
        assert_eq!(file.rules[0].name, "r");
    }

    #[test]
    fn invalid_rule_name_rejected() {
        let text = SIMPLE.replace("high_temp", "9high");
        assert!(matches!(parse_rules(&text), Err(DslError::Parse(_))));
    }

    #[test]
    fn nested_groups_parse() {
        let text = r#"
rules:
  - name: nested
    conditions:
      any:
        - all:
            - type: comparison
              sensor: input:a
              operator: ">"
              value: 0
            - type: comparison
              sensor: input:b
              operator: "=="
              value: true
        - type: expression
          expression: "input:c < 5"
    actions:
      - type: log
        message: fired
"#;
        let file = parse_rules(text).unwrap();
        let group = &file.rules[0].conditions;
        assert_eq!(group.kind, GroupKind::Any);
        assert!(matches!(group.members[0], ConditionNode::Group(_)));
        assert!(matches!(
            group.members[1],
            ConditionNode::Leaf(ConditionDecl::Expression { .. })
        ));
    }

    #[test]
    fn fallback_policies_parse() {
        let text = r#"
rules:
  - name: fb
    inputs:
      - id: input:a
        fallback:
          strategy: use_last_known
          max_age: 5s
      - id: input:b
        required: false
        fallback:
          strategy: use_default
          default: 0
      - input:c
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 1
    actions:
      - type: log
        message: ok
"#;
        let file = parse_rules(text).unwrap();
        let inputs = &file.rules[0].inputs;
        assert_eq!(
            inputs[0].fallback,
            FallbackPolicy::UseLastKnown {
                max_age: Duration::from_secs(5)
            }
        );
        assert_eq!(
            inputs[1].fallback,
            FallbackPolicy::UseDefault {
                default: ScalarLit::Number(0.0)
            }
        );
        assert!(!inputs[1].required);
        assert_eq!(inputs[2].fallback, FallbackPolicy::PropagateUnavailable);
        assert!(inputs[2].required);
    }

    #[test]
    fn use_last_known_without_max_age_rejected() {
        let text = r#"
rules:
  - name: fb
    inputs:
      - id: input:a
        fallback:
          strategy: use_last_known
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 1
    actions:
      - type: log
        message: ok
"#;
        assert!(matches!(parse_rules(text), Err(DslError::Parse(_))));
    }
}
