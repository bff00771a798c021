//! Three-valued expression evaluation over tagged values.
//!
//! Any `Unavailable` operand propagates to the result, except through the
//! strong-Kleene boolean operators and `coalesce`. Runtime faults (divide
//! by zero, non-finite results, type mismatches) also yield `Unavailable`;
//! the evaluator distinguishes the two by checking referenced sensors.

use std::collections::HashMap;

use beacon_lang::ast::{BinOp, CmpOp, Expr};

use crate::tri::Tri;
use crate::value::{
    TaggedValue, parse_flexible_bool, parse_wire_number, value_to_string, values_equal,
};

/// Resolved per-rule view of the cycle: the frozen snapshot plus fallback
/// overrides, and the cycle timestamp for `now()`.
pub struct EvalContext<'a> {
    pub snapshot: &'a HashMap<String, TaggedValue>,
    pub overrides: &'a HashMap<String, TaggedValue>,
    pub now_ms: i64,
}

impl EvalContext<'_> {
    pub fn lookup(&self, key: &str) -> TaggedValue {
        self.overrides
            .get(key)
            .or_else(|| self.snapshot.get(key))
            .cloned()
            .unwrap_or(TaggedValue::Unavailable)
    }
}

/// Evaluate an expression tree.
pub fn eval_expr(expr: &Expr, ctx: &EvalContext<'_>) -> TaggedValue {
    match expr {
        Expr::Number(n) => TaggedValue::Number(*n),
        Expr::StringLit(s) => TaggedValue::Str(s.clone()),
        Expr::Bool(b) => TaggedValue::Bool(*b),
        Expr::Sensor(sensor) => ctx.lookup(&sensor.key).get_path(&sensor.path),
        Expr::Neg(inner) => match eval_expr(inner, ctx) {
            TaggedValue::Number(n) => TaggedValue::Number(-n),
            _ => TaggedValue::Unavailable,
        },
        Expr::Not(inner) => tri_to_value(value_to_tri(&eval_expr(inner, ctx)).not()),
        Expr::BinOp { op, left, right } => eval_binop(*op, left, right, ctx),
        Expr::FuncCall { name, args } => eval_func(name, args, ctx),
        _ => TaggedValue::Unavailable,
    }
}

fn eval_binop(op: BinOp, left: &Expr, right: &Expr, ctx: &EvalContext<'_>) -> TaggedValue {
    match op {
        BinOp::And => {
            let l = value_to_tri(&eval_expr(left, ctx));
            let r = value_to_tri(&eval_expr(right, ctx));
            tri_to_value(l.and(r))
        }
        BinOp::Or => {
            let l = value_to_tri(&eval_expr(left, ctx));
            let r = value_to_tri(&eval_expr(right, ctx));
            tri_to_value(l.or(r))
        }
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let l = eval_expr(left, ctx);
            let r = eval_expr(right, ctx);
            let cmp = binop_to_cmp(op);
            tri_to_value(compare_tagged(cmp, &l, &r))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let Some(l) = eval_expr(left, ctx).as_number() else {
                return TaggedValue::Unavailable;
            };
            let Some(r) = eval_expr(right, ctx).as_number() else {
                return TaggedValue::Unavailable;
            };
            let out = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => {
                    if r == 0.0 {
                        return TaggedValue::Unavailable;
                    }
                    l / r
                }
                BinOp::Mod => {
                    if r == 0.0 {
                        return TaggedValue::Unavailable;
                    }
                    l % r
                }
                _ => unreachable!("arithmetic op"),
            };
            if out.is_finite() {
                TaggedValue::Number(out)
            } else {
                TaggedValue::Unavailable
            }
        }
        _ => TaggedValue::Unavailable,
    }
}

fn binop_to_cmp(op: BinOp) -> CmpOp {
    match op {
        BinOp::Eq => CmpOp::Eq,
        BinOp::Ne => CmpOp::Ne,
        BinOp::Lt => CmpOp::Lt,
        BinOp::Gt => CmpOp::Gt,
        BinOp::Le => CmpOp::Le,
        BinOp::Ge => CmpOp::Ge,
        _ => unreachable!("not a comparison"),
    }
}

/// Truthiness for boolean contexts: only booleans carry truth; everything
/// else (including numbers and strings) is indeterminate.
pub fn value_to_tri(v: &TaggedValue) -> Tri {
    match v {
        TaggedValue::Bool(b) => Tri::from(*b),
        TaggedValue::Str(s) => parse_flexible_bool(s)
            .map(Tri::from)
            .unwrap_or(Tri::Indeterminate),
        _ => Tri::Indeterminate,
    }
}

fn tri_to_value(t: Tri) -> TaggedValue {
    match t {
        Tri::True => TaggedValue::Bool(true),
        Tri::False => TaggedValue::Bool(false),
        Tri::Indeterminate => TaggedValue::Unavailable,
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compare two tagged values under an operator. `Indeterminate` when either
/// side is unavailable or the pair is not comparable. Strings coerce toward
/// the other side's type (flexible booleans, `,`-tolerant numbers).
pub fn compare_tagged(op: CmpOp, left: &TaggedValue, right: &TaggedValue) -> Tri {
    use TaggedValue::*;
    match (left, right) {
        (Unavailable, _) | (_, Unavailable) => Tri::Indeterminate,
        (Number(a), Number(b)) => compare_f64(op, *a, *b),
        (Str(a), Str(b)) => compare_ord(op, a, b),
        (Bool(a), Bool(b)) => match op {
            CmpOp::Eq => Tri::from(a == b),
            CmpOp::Ne => Tri::from(a != b),
            _ => Tri::Indeterminate,
        },
        (Str(s), Number(n)) => match parse_wire_number(s) {
            Some(a) => compare_f64(op, a, *n),
            None => Tri::Indeterminate,
        },
        (Number(n), Str(s)) => match parse_wire_number(s) {
            Some(b) => compare_f64(op, *n, b),
            None => Tri::Indeterminate,
        },
        (Str(s), Bool(b)) => match (op, parse_flexible_bool(s)) {
            (CmpOp::Eq, Some(a)) => Tri::from(a == *b),
            (CmpOp::Ne, Some(a)) => Tri::from(a != *b),
            _ => Tri::Indeterminate,
        },
        (Bool(b), Str(s)) => match (op, parse_flexible_bool(s)) {
            (CmpOp::Eq, Some(a)) => Tri::from(*b == a),
            (CmpOp::Ne, Some(a)) => Tri::from(*b != a),
            _ => Tri::Indeterminate,
        },
        (Object(_), Object(_)) => match op {
            CmpOp::Eq => Tri::from(values_equal(left, right)),
            CmpOp::Ne => Tri::from(!values_equal(left, right)),
            _ => Tri::Indeterminate,
        },
        _ => Tri::Indeterminate,
    }
}

pub fn compare_f64(op: CmpOp, a: f64, b: f64) -> Tri {
    if a.is_nan() || b.is_nan() {
        return Tri::Indeterminate;
    }
    match op {
        CmpOp::Eq => Tri::from(a == b),
        CmpOp::Ne => Tri::from(a != b),
        CmpOp::Lt => Tri::from(a < b),
        CmpOp::Gt => Tri::from(a > b),
        CmpOp::Le => Tri::from(a <= b),
        CmpOp::Ge => Tri::from(a >= b),
        _ => Tri::Indeterminate,
    }
}

fn compare_ord<T: Ord + ?Sized>(op: CmpOp, a: &T, b: &T) -> Tri {
    match op {
        CmpOp::Eq => Tri::from(a == b),
        CmpOp::Ne => Tri::from(a != b),
        CmpOp::Lt => Tri::from(a < b),
        CmpOp::Gt => Tri::from(a > b),
        CmpOp::Le => Tri::from(a <= b),
        CmpOp::Ge => Tri::from(a >= b),
        _ => Tri::Indeterminate,
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn eval_func(name: &str, args: &[Expr], ctx: &EvalContext<'_>) -> TaggedValue {
    match name {
        "now" => {
            if !args.is_empty() {
                return TaggedValue::Unavailable;
            }
            TaggedValue::Number(ctx.now_ms as f64)
        }
        "abs" => unary_num(args, ctx, f64::abs),
        "floor" => unary_num(args, ctx, f64::floor),
        "ceil" => unary_num(args, ctx, f64::ceil),
        "round" => unary_num(args, ctx, f64::round),
        "min" | "max" => {
            if args.is_empty() {
                return TaggedValue::Unavailable;
            }
            let mut best: Option<f64> = None;
            for arg in args {
                let Some(n) = eval_expr(arg, ctx).as_number() else {
                    return TaggedValue::Unavailable;
                };
                best = Some(match best {
                    None => n,
                    Some(b) if name == "min" => b.min(n),
                    Some(b) => b.max(n),
                });
            }
            TaggedValue::Number(best.expect("args checked non-empty"))
        }
        "clamp" => {
            if args.len() != 3 {
                return TaggedValue::Unavailable;
            }
            let nums: Option<Vec<f64>> =
                args.iter().map(|a| eval_expr(a, ctx).as_number()).collect();
            match nums {
                Some(v) if v[1] <= v[2] => TaggedValue::Number(v[0].clamp(v[1], v[2])),
                _ => TaggedValue::Unavailable,
            }
        }
        "len" => match single_str(args, ctx) {
            Some(s) => TaggedValue::Number(s.chars().count() as f64),
            None => TaggedValue::Unavailable,
        },
        "lower" => map_str(args, ctx, |s| s.to_lowercase()),
        "upper" => map_str(args, ctx, |s| s.to_uppercase()),
        "trim" => map_str(args, ctx, |s| s.trim().to_string()),
        "concat" => {
            if args.is_empty() {
                return TaggedValue::Unavailable;
            }
            let mut out = String::new();
            for arg in args {
                let v = eval_expr(arg, ctx);
                if !v.is_available() {
                    return TaggedValue::Unavailable;
                }
                out.push_str(&value_to_string(&v));
            }
            TaggedValue::Str(out)
        }
        "contains" => binary_str(args, ctx, |a, b| a.contains(b)),
        "startswith" => binary_str(args, ctx, |a, b| a.starts_with(b)),
        "endswith" => binary_str(args, ctx, |a, b| a.ends_with(b)),
        "coalesce" => {
            for arg in args {
                let v = eval_expr(arg, ctx);
                if v.is_available() {
                    return v;
                }
            }
            TaggedValue::Unavailable
        }
        _ => TaggedValue::Unavailable,
    }
}

fn unary_num(args: &[Expr], ctx: &EvalContext<'_>, f: impl Fn(f64) -> f64) -> TaggedValue {
    if args.len() != 1 {
        return TaggedValue::Unavailable;
    }
    match eval_expr(&args[0], ctx).as_number() {
        Some(n) => TaggedValue::Number(f(n)),
        None => TaggedValue::Unavailable,
    }
}

fn single_str(args: &[Expr], ctx: &EvalContext<'_>) -> Option<String> {
    if args.len() != 1 {
        return None;
    }
    match eval_expr(&args[0], ctx) {
        TaggedValue::Str(s) => Some(s),
        _ => None,
    }
}

fn map_str(args: &[Expr], ctx: &EvalContext<'_>, f: impl Fn(&str) -> String) -> TaggedValue {
    match single_str(args, ctx) {
        Some(s) => TaggedValue::Str(f(&s)),
        None => TaggedValue::Unavailable,
    }
}

fn binary_str(args: &[Expr], ctx: &EvalContext<'_>, f: impl Fn(&str, &str) -> bool) -> TaggedValue {
    if args.len() != 2 {
        return TaggedValue::Unavailable;
    }
    let (TaggedValue::Str(a), TaggedValue::Str(b)) =
        (eval_expr(&args[0], ctx), eval_expr(&args[1], ctx))
    else {
        return TaggedValue::Unavailable;
    };
    TaggedValue::Bool(f(&a, &b))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
