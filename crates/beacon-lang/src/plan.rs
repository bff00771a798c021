use std::time::Duration;

use crate::ast::{CmpOp, EmitMode, Expr, FallbackPolicy, ScalarLit, SensorRef};

// ---------------------------------------------------------------------------
// ExprPlan — alias for ast::Expr
// ---------------------------------------------------------------------------

/// Expression in the execution plan. The compiled form reuses the parsed
/// tree; evaluation happens against tagged runtime values.
pub type ExprPlan = Expr;

// ---------------------------------------------------------------------------
// RulePlan — the immutable compiled artifact
// ---------------------------------------------------------------------------

/// Compiled rule set: ordered layers, per-sensor buffer requirements, and
/// the set of keys to fetch each cycle. Shared immutably between the
/// scheduler and the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct RulePlan {
    pub layers: Vec<Layer>,
    /// Sorted union of every key any rule reads.
    pub fetch_keys: Vec<String>,
    /// Temporal ring requirements derived from `threshold_over_time`
    /// conditions and `use_last_known` fallbacks.
    pub buffer_specs: Vec<BufferSpec>,
    /// Cycle period the plan was compiled against.
    pub cycle_time: Duration,
}

impl RulePlan {
    pub fn rule_count(&self) -> usize {
        self.layers.iter().map(|l| l.rules.len()).sum()
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .flat_map(|l| l.rules.iter().map(|r| r.name.clone()))
            .collect()
    }

    /// Sorted `set` target keys across all rules.
    pub fn output_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .layers
            .iter()
            .flat_map(|l| l.rules.iter())
            .flat_map(|r| r.writes.iter().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// One evaluation layer: rules with no intra-layer data dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub rules: Vec<RuleExec>,
}

/// A compiled rule ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleExec {
    pub name: String,
    pub inputs: Vec<InputPlan>,
    pub condition: GroupPlan,
    pub actions: Vec<ActionPlan>,
    pub else_actions: Vec<ActionPlan>,
    /// Keys this rule reads (sensors + inputs), sorted.
    pub reads: Vec<String>,
    /// Keys this rule writes via `set`, sorted.
    pub writes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPlan {
    pub id: String,
    pub required: bool,
    pub fallback: FallbackPolicy,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum GroupPlan {
    All(Vec<CondPlan>),
    Any(Vec<CondPlan>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CondPlan {
    Comparison {
        sensor: SensorRef,
        op: CmpOp,
        value: ScalarLit,
    },
    Expression {
        expr: ExprPlan,
    },
    Threshold {
        sensor: String,
        op: CmpOp,
        threshold: f64,
        duration: Duration,
    },
    Group(Box<GroupPlan>),
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A compiled action. The checker guarantees exactly one value source, so
/// plans carry a single resolved [`ValuePlan`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPlan {
    Set {
        key: String,
        value: ValuePlan,
        emit: EmitMode,
    },
    Log {
        message: String,
        emit: EmitMode,
    },
    Buffer {
        key: String,
        value: ValuePlan,
        max_items: usize,
        emit: EmitMode,
    },
    SendMessage {
        channel: String,
        message: ValuePlan,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValuePlan {
    Literal(ScalarLit),
    Expr(ExprPlan),
}

// ---------------------------------------------------------------------------
// BufferSpec
// ---------------------------------------------------------------------------

/// Ring-capacity requirement for one sensor, sized by the compiler from the
/// longest window used and the cycle period (plus a safety margin).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSpec {
    pub sensor: String,
    pub capacity: usize,
    pub max_window: Duration,
}
