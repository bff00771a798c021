use std::time::Duration;

use crate::ast::RuleFile;
use crate::checker::{CheckContext, Severity, check_rules};
use crate::dsl::parse_rules;

fn check(text: &str) -> Vec<super::CheckError> {
    check_with(text, &[], None)
}

fn check_with(text: &str, known: &[&str], retention: Option<Duration>) -> Vec<super::CheckError> {
    let file: RuleFile = parse_rules(text).unwrap();
    let known: Vec<String> = known.iter().map(|s| s.to_string()).collect();
    check_rules(
        &file,
        &CheckContext {
            known_sensors: &known,
            retention,
        },
    )
}

fn errors_of(findings: &[super::CheckError]) -> Vec<&super::CheckError> {
    findings
        .iter()
        .filter(|e| e.severity == Severity::Error)
        .collect()
}

fn warnings_of(findings: &[super::CheckError]) -> Vec<&super::CheckError> {
    findings
        .iter()
        .filter(|e| e.severity == Severity::Warning)
        .collect()
}

const VALID: &str = r#"
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
fn valid_rule_has_no_findings() {
    assert!(check(VALID).is_empty());
}

#[test]
fn duplicate_rule_names_rejected() {
    let text = format!(
        "{}{}",
        VALID,
        r#"
  - name: high_temp
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: "<"
          value: 0
    actions:
      - type: log
        message: dup
"#
    );
    let findings = check(&text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("duplicate"));
}

#[test]
fn empty_top_level_group_is_error() {
    let text = r#"
rules:
  - name: empty
    conditions:
      all: []
    actions:
      - type: log
        message: never
"#;
    let findings = check(text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("no condition leaf"));
}

#[test]
fn empty_nested_group_warns() {
    let text = r#"
rules:
  - name: nested_empty
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
        - any: []
    actions:
      - type: log
        message: hit
"#;
    let findings = check(text);
    assert!(errors_of(&findings).is_empty());
    let warnings = warnings_of(&findings);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("always evaluates true"));
}

#[test]
fn threshold_needs_ordered_operator() {
    let text = r#"
rules:
  - name: sustained
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temp
          operator: "=="
          threshold: 75
          duration: 10s
    actions:
      - type: log
        message: hit
"#;
    let findings = check(text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("ordered operator"));
}

#[test]
fn threshold_needs_positive_duration() {
    let text = r#"
rules:
  - name: sustained
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temp
          operator: ">"
          threshold: 75
          duration: 0
    actions:
      - type: log
        message: hit
"#;
    let findings = check(text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("duration > 0"));
}

#[test]
fn threshold_duration_beyond_retention_warns() {
    let text = r#"
rules:
  - name: sustained
    conditions:
      all:
        - type: threshold_over_time
          sensor: input:temp
          operator: ">"
          threshold: 75
          duration: 60s
    actions:
      - type: log
        message: hit
"#;
    let findings = check_with(text, &[], Some(Duration::from_secs(10)));
    assert!(errors_of(&findings).is_empty());
    assert!(warnings_of(&findings)[0].message.contains("retention"));
}

#[test]
fn set_requires_exactly_one_value_source() {
    let both = r#"
rules:
  - name: r
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:k
        value: 1
        value_expression: "input:a * 2"
"#;
    let neither = both
        .lines()
        .filter(|l| !l.contains("value: 1") && !l.contains("value_expression"))
        .collect::<Vec<_>>()
        .join("\n");
    for text in [both.to_string(), neither] {
        let findings = check(&text);
        assert_eq!(errors_of(&findings).len(), 1, "{findings:?}");
        assert!(findings[0].message.contains("exactly one"));
    }
}

#[test]
fn set_key_must_be_namespaced() {
    let text = VALID.replace("output:high_temperature", "high_temperature");
    let findings = check(&text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("namespaces"));
}

#[test]
fn send_message_needs_channel_and_one_body() {
    let text = r#"
rules:
  - name: r
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: send_message
        channel: ""
        message: hi
        message_expression: "concat('x', 'y')"
"#;
    let findings = check(text);
    let errs = errors_of(&findings);
    assert_eq!(errs.len(), 2, "{findings:?}");
}

#[test]
fn undeclared_bare_sensor_is_error() {
    let text = VALID.replace("input:temperature", "temperature");
    let findings = check(&text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("not a declared input"));
}

#[test]
fn catalog_restricts_sensors_when_present() {
    let findings = check_with(VALID, &["input:pressure"], None);
    assert_eq!(errors_of(&findings).len(), 1);

    let ok = check_with(VALID, &["input:temperature"], None);
    assert!(ok.is_empty());
}

#[test]
fn produced_keys_satisfy_references() {
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
    assert!(check(text).is_empty());
}

#[test]
fn casing_mismatch_warns() {
    let text = r#"
rules:
  - name: a
    conditions:
      all:
        - type: comparison
          sensor: input:Temperature
          operator: ">"
          value: 0
    actions:
      - type: log
        message: x
  - name: b
    conditions:
      all:
        - type: comparison
          sensor: input:temperature
          operator: ">"
          value: 0
    actions:
      - type: log
        message: y
"#;
    let findings = check(text);
    assert!(errors_of(&findings).is_empty());
    assert!(
        warnings_of(&findings)
            .iter()
            .any(|w| w.message.contains("casing"))
    );
}

#[test]
fn unreachable_else_warns() {
    let text = r#"
rules:
  - name: r
    conditions:
      all:
        - type: expression
          expression: "true"
    actions:
      - type: log
        message: always
    else:
      - type: log
        message: never
"#;
    let findings = check(text);
    assert!(
        warnings_of(&findings)
            .iter()
            .any(|w| w.message.contains("unreachable"))
    );
}

#[test]
fn non_boolean_condition_expression_warns() {
    let text = r#"
rules:
  - name: r
    conditions:
      all:
        - type: expression
          expression: "1 + 2"
    actions:
      - type: log
        message: hit
"#;
    let findings = check(text);
    assert!(
        warnings_of(&findings)
            .iter()
            .any(|w| w.message.contains("boolean"))
    );
}

#[test]
fn optional_input_with_skip_rule_warns() {
    let text = r#"
rules:
  - name: r
    inputs:
      - id: input:a
        required: false
        fallback:
          strategy: skip_rule
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: log
        message: hit
"#;
    let findings = check(text);
    assert!(errors_of(&findings).is_empty());
    assert!(
        warnings_of(&findings)
            .iter()
            .any(|w| w.message.contains("skip_rule fallback on an optional input"))
    );
}

#[test]
fn use_last_known_zero_max_age_is_error() {
    let text = r#"
rules:
  - name: r
    inputs:
      - id: input:a
        fallback:
          strategy: use_last_known
          max_age: 0
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: log
        message: hit
"#;
    let findings = check(text);
    assert_eq!(errors_of(&findings).len(), 1);
    assert!(findings[0].message.contains("max_age"));
}
