//! Best-effort type inference over rule expressions.
//!
//! Sensor values are unknown until runtime, so inference is conservative:
//! anything touching a sensor or `coalesce` comes back [`ValType::Unknown`]
//! and never produces a finding.

use crate::ast::{BinOp, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    Number,
    Bool,
    Str,
    Unknown,
}

/// Infer the static type of an expression.
pub fn infer(expr: &Expr) -> ValType {
    match expr {
        Expr::Number(_) => ValType::Number,
        Expr::StringLit(_) => ValType::Str,
        Expr::Bool(_) => ValType::Bool,
        Expr::Sensor(_) => ValType::Unknown,
        Expr::Neg(_) => ValType::Number,
        Expr::Not(_) => ValType::Bool,
        Expr::BinOp { op, .. } => match op {
            BinOp::And | BinOp::Or => ValType::Bool,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => ValType::Bool,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => ValType::Number,
        },
        Expr::FuncCall { name, .. } => match name.as_str() {
            "now" | "abs" | "min" | "max" | "round" | "floor" | "ceil" | "clamp" | "len" => {
                ValType::Number
            }
            "lower" | "upper" | "trim" | "concat" => ValType::Str,
            "contains" | "startswith" | "endswith" => ValType::Bool,
            _ => ValType::Unknown,
        },
    }
}
