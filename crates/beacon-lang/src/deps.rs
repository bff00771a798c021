//! Rule dependency analysis and layer assignment.
//!
//! Rule R depends on rule R′ when R reads a key R′ produces via `set`.
//! Layers come from Kahn's algorithm with the ready set drained in
//! lexicographic name order, so the same rule file always yields the same
//! layering. A rule reading its **own** output is not a dependency edge:
//! reads observe the previous cycle's committed state, so self-feedback is
//! well-defined.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{ActionDecl, RuleDecl};
use crate::checker::referenced_sensors;

/// Deterministic layer assignment: `layers[i]` lists rule names whose
/// longest producer chain has length `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerAssignment {
    pub layers: Vec<Vec<String>>,
}

impl LayerAssignment {
    /// Number of layers, i.e. the dependency depth of the rule set.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

/// Keys a rule writes via `set` (either branch).
pub fn writes_of(rule: &RuleDecl) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for action in rule.actions.iter().chain(&rule.else_actions) {
        if let ActionDecl::Set { key, .. } = action {
            keys.insert(key.clone());
        }
    }
    keys
}

/// Keys a rule reads: referenced sensors plus declared inputs.
pub fn reads_of(rule: &RuleDecl) -> BTreeSet<String> {
    let mut keys = referenced_sensors(rule);
    for input in &rule.inputs {
        keys.insert(input.id.clone());
    }
    keys
}

/// Assign layers to `rules`; a dependency cycle is a fatal error whose
/// message lists the members in order.
pub fn assign_layers(rules: &[&RuleDecl]) -> anyhow::Result<LayerAssignment> {
    // key → producing rules
    let mut producers: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for rule in rules {
        for key in writes_of(rule) {
            producers.entry(key).or_default().push(rule.name.as_str());
        }
    }

    // name → set of rules it depends on
    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for rule in rules {
        let entry = deps.entry(rule.name.as_str()).or_default();
        for key in reads_of(rule) {
            if let Some(prods) = producers.get(&key) {
                for p in prods {
                    if *p != rule.name {
                        entry.insert(*p);
                    }
                }
            }
        }
    }

    // Kahn with depth tracking; ready set drained in name order.
    let mut dependants: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    for (name, ds) in &deps {
        indegree.insert(*name, ds.len());
        for d in ds {
            dependants.entry(*d).or_default().insert(*name);
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
    let mut processed = 0usize;

    while let Some(name) = ready.iter().next().copied() {
        ready.remove(name);
        processed += 1;
        let d = *depth.entry(name).or_insert(0);
        if let Some(succs) = dependants.get(name) {
            for succ in succs.clone() {
                let e = depth.entry(succ).or_insert(0);
                *e = (*e).max(d + 1);
                let n = indegree.get_mut(succ).expect("successor tracked");
                *n -= 1;
                if *n == 0 {
                    ready.insert(succ);
                }
            }
        }
    }

    if processed < rules.len() {
        let cycle = find_cycle(&deps);
        anyhow::bail!(
            "rule dependency cycle: {}",
            cycle.join(" -> ")
        );
    }

    let max_depth = depth.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<String>> = vec![Vec::new(); if rules.is_empty() { 0 } else { max_depth + 1 }];
    for rule in rules {
        let d = depth.get(rule.name.as_str()).copied().unwrap_or(0);
        layers[d].push(rule.name.clone());
    }
    for layer in &mut layers {
        layer.sort();
    }

    Ok(LayerAssignment { layers })
}

/// Walk the dependency map from the lexicographically first unresolved node
/// until a node repeats, then return the cycle segment (closed).
fn find_cycle<'a>(deps: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> Vec<&'a str> {
    // Nodes that still have dependencies on other unresolved nodes form the
    // cycle set; any walk inside it must loop.
    let mut trail: Vec<&str> = Vec::new();
    let mut current = match cycle_candidate(deps) {
        Some(c) => c,
        None => return trail,
    };
    loop {
        if let Some(pos) = trail.iter().position(|n| *n == current) {
            let mut cycle: Vec<&str> = trail[pos..].to_vec();
            cycle.push(current);
            return cycle;
        }
        trail.push(current);
        let next = deps
            .get(current)
            .and_then(|ds| ds.iter().find(|d| in_cycle_set(deps, d)).copied());
        match next {
            Some(n) => current = n,
            None => return trail,
        }
    }
}

fn cycle_candidate<'a>(deps: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> Option<&'a str> {
    deps.keys().find(|n| in_cycle_set(deps, n)).copied()
}

/// A node participates in a cycle when it can reach itself.
fn in_cycle_set(deps: &BTreeMap<&str, BTreeSet<&str>>, start: &str) -> bool {
    let mut stack: Vec<&str> = deps.get(start).into_iter().flatten().copied().collect();
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if visited.insert(node) {
            stack.extend(deps.get(node).into_iter().flatten().copied());
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_rules;

    fn layering(text: &str) -> anyhow::Result<LayerAssignment> {
        let file = parse_rules(text).unwrap();
        let refs: Vec<&RuleDecl> = file.rules.iter().collect();
        assign_layers(&refs)
    }

    const CASCADE: &str = r#"
rules:
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
"#;

    #[test]
    fn cascade_layers_in_dependency_order() {
        let layers = layering(CASCADE).unwrap();
        assert_eq!(
            layers.layers,
            vec![vec!["normalize".to_string()], vec!["alert_level".to_string()]]
        );
    }

    #[test]
    fn independent_rules_share_a_layer_sorted_by_name() {
        let text = r#"
rules:
  - name: zeta
    conditions:
      all:
        - type: comparison
          sensor: input:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:z
        value: 1
  - name: alpha
    conditions:
      all:
        - type: comparison
          sensor: input:b
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:a
        value: 1
"#;
        let layers = layering(text).unwrap();
        assert_eq!(layers.layers, vec![vec!["alpha".to_string(), "zeta".to_string()]]);
    }

    #[test]
    fn cycles_are_fatal_and_named() {
        let text = r#"
rules:
  - name: a
    conditions:
      all:
        - type: comparison
          sensor: output:b
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:a
        value: 1
  - name: b
    conditions:
      all:
        - type: comparison
          sensor: output:a
          operator: ">"
          value: 0
    actions:
      - type: set
        key: output:b
        value: 1
"#;
        let err = layering(text).unwrap_err().to_string();
        assert!(err.contains("cycle"), "{err}");
        assert!(err.contains('a') && err.contains('b'), "{err}");
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        // A rule reading its own previous-cycle output is legal.
        let text = r#"
rules:
  - name: counter
    conditions:
      all:
        - type: comparison
          sensor: input:tick
          operator: "=="
          value: true
    actions:
      - type: set
        key: output:count
        value_expression: "output:count + 1"
"#;
        let layers = layering(text).unwrap();
        assert_eq!(layers.layers, vec![vec!["counter".to_string()]]);
    }

    #[test]
    fn no_rule_depends_on_same_or_later_layer() {
        let file = parse_rules(CASCADE).unwrap();
        let refs: Vec<&RuleDecl> = file.rules.iter().collect();
        let layers = assign_layers(&refs).unwrap();

        let layer_of = |name: &str| {
            layers
                .layers
                .iter()
                .position(|l| l.iter().any(|n| n == name))
                .unwrap()
        };
        for rule in &file.rules {
            for key in reads_of(rule) {
                for other in &file.rules {
                    if other.name != rule.name && writes_of(other).contains(&key) {
                        assert!(layer_of(&other.name) < layer_of(&rule.name));
                    }
                }
            }
        }
    }
}
