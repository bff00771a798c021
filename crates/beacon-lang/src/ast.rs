use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

/// A complete parsed rule document.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct RuleFile {
    pub version: Option<String>,
    pub rules: Vec<RuleDecl>,
}

impl RuleFile {
    /// Merge parsed documents into one rule set; the first declared
    /// version wins. Cross-file dependencies layer like any others.
    pub fn merge(files: impl IntoIterator<Item = RuleFile>) -> RuleFile {
        let mut version = None;
        let mut rules = Vec::new();
        for file in files {
            if version.is_none() {
                version = file.version;
            }
            rules.extend(file.rules);
        }
        RuleFile { version, rules }
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// One rule: inputs, a condition group, primary actions, optional else block.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct RuleDecl {
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub inputs: Vec<InputDecl>,
    pub conditions: ConditionGroup,
    pub actions: Vec<ActionDecl>,
    pub else_actions: Vec<ActionDecl>,
}

/// A declared input sensor with its fallback policy.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct InputDecl {
    pub id: String,
    pub required: bool,
    pub fallback: FallbackPolicy,
}

/// What the evaluator substitutes when an input is unavailable.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum FallbackPolicy {
    PropagateUnavailable,
    UseDefault { default: ScalarLit },
    UseLastKnown { max_age: Duration },
    SkipRule,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// `all` (conjunction) or `any` (disjunction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    All,
    Any,
}

/// An ordered group of conditions; groups may nest.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ConditionGroup {
    pub kind: GroupKind,
    pub members: Vec<ConditionNode>,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConditionNode {
    Leaf(ConditionDecl),
    Group(ConditionGroup),
}

/// A condition leaf. `Comparison` and `ThresholdOverTime` name a sensor
/// directly; `Expression` carries a parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConditionDecl {
    Comparison {
        sensor: SensorRef,
        op: CmpOp,
        value: ScalarLit,
    },
    Expression {
        expr: Expr,
    },
    ThresholdOverTime {
        sensor: String,
        op: CmpOp,
        threshold: f64,
        duration: Duration,
    },
}

/// A sensor key plus an optional nested-property path into an object value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct SensorRef {
    pub key: String,
    pub path: Vec<String>,
}

impl SensorRef {
    pub fn bare(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// When an action's effect is staged: every cycle, on value change, or on
/// branch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    Always,
    OnChange,
    OnEnter,
}

/// A parsed action. `value`/`value_expression` (resp. `message`/
/// `message_expression`) are both optional here; the checker enforces
/// exactly-one and the compiler resolves them into a single plan field.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ActionDecl {
    Set {
        key: String,
        value: Option<ScalarLit>,
        value_expression: Option<Expr>,
        emit: EmitMode,
    },
    Log {
        message: String,
        emit: EmitMode,
    },
    Buffer {
        key: String,
        value: Option<ScalarLit>,
        value_expression: Option<Expr>,
        max_items: usize,
        emit: EmitMode,
    },
    SendMessage {
        channel: String,
        message: Option<String>,
        message_expression: Option<Expr>,
    },
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    /// Ordered operators are the only ones `threshold_over_time` accepts.
    pub fn is_ordered(&self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Gt | CmpOp::Le | CmpOp::Ge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

// ---------------------------------------------------------------------------
// Literals & expressions
// ---------------------------------------------------------------------------

/// A scalar literal carried by comparisons, defaults, and `set` values.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ScalarLit {
    Number(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Expr {
    /// Number literal (integer or float).
    Number(f64),
    /// String literal.
    StringLit(String),
    /// Boolean literal.
    Bool(bool),
    /// Sensor reference, e.g. `input:temperature` or `input:env.humidity`.
    Sensor(SensorRef),
    /// Binary operation.
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Boolean negation: `not x` / `!x`.
    Not(Box<Expr>),
    /// Arithmetic negation.
    Neg(Box<Expr>),
    /// Whitelisted function call: `name(args...)`.
    FuncCall { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Collect every sensor key referenced anywhere in this expression.
    pub fn sensor_keys(&self, out: &mut Vec<String>) {
        match self {
            Expr::Sensor(s) => out.push(s.key.clone()),
            Expr::BinOp { left, right, .. } => {
                left.sensor_keys(out);
                right.sensor_keys(out);
            }
            Expr::Not(inner) | Expr::Neg(inner) => inner.sensor_keys(out),
            Expr::FuncCall { args, .. } => {
                for arg in args {
                    arg.sensor_keys(out);
                }
            }
            Expr::Number(_) | Expr::StringLit(_) | Expr::Bool(_) => {}
        }
    }
}
