//! Expression grammar for condition and value expressions.
//!
//! Precedence, lowest to highest: `or` < `and` < comparison < additive <
//! multiplicative < unary. Both keyword (`and`/`or`/`not`) and symbolic
//! (`&&`/`||`/`!`) boolean operators are accepted. Function names come from
//! a closed whitelist; anything else fails at parse time.

use winnow::combinator::{alt, cut_err, opt, separated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

use crate::ast::{BinOp, Expr, SensorRef};
use crate::parse_utils::{ident, kw, number_literal, quoted_string, ws_skip};

/// Functions callable from rule expressions.
pub const FUNCTION_WHITELIST: &[&str] = &[
    "now",
    "abs",
    "min",
    "max",
    "round",
    "floor",
    "ceil",
    "clamp",
    "len",
    "lower",
    "upper",
    "trim",
    "concat",
    "contains",
    "startswith",
    "endswith",
    "coalesce",
];

/// Parse a complete expression string, requiring all input to be consumed.
pub fn parse_expr_str(src: &str) -> anyhow::Result<Expr> {
    let mut input = src;
    ws_skip
        .parse_next(&mut input)
        .map_err(|e| anyhow::anyhow!("expression {src:?}: {e}"))?;
    let expr = parse_expr(&mut input)
        .map_err(|e| anyhow::anyhow!("invalid expression {src:?}: {e}"))?;
    ws_skip
        .parse_next(&mut input)
        .map_err(|e| anyhow::anyhow!("expression {src:?}: {e}"))?;
    if !input.is_empty() {
        anyhow::bail!("invalid expression {src:?}: trailing input at {input:?}");
    }
    Ok(expr)
}

pub(crate) fn parse_expr(input: &mut &str) -> ModalResult<Expr> {
    or_expr.parse_next(input)
}

// ---------------------------------------------------------------------------
// Precedence levels (lowest to highest)
// ---------------------------------------------------------------------------

/// `or_expr = and_expr { ("||" | "or") and_expr }`
fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = and_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let hit = opt(alt((literal("||").void(), kw("or")))).parse_next(input)?;
        if hit.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(and_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `and_expr = not_expr { ("&&" | "and") not_expr }`
fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = not_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let hit = opt(alt((literal("&&").void(), kw("and")))).parse_next(input)?;
        if hit.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(not_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `not_expr = ("!" | "not") not_expr | cmp_expr`
fn not_expr(input: &mut &str) -> ModalResult<Expr> {
    let hit = opt(alt((literal("!").void(), kw("not")))).parse_next(input)?;
    if hit.is_some() {
        ws_skip.parse_next(input)?;
        let inner = cut_err(not_expr).parse_next(input)?;
        Ok(Expr::Not(Box::new(inner)))
    } else {
        cmp_expr.parse_next(input)
    }
}

/// `cmp_expr = add_expr [cmp_op add_expr]`
fn cmp_expr(input: &mut &str) -> ModalResult<Expr> {
    let left = add_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;
    if let Some(op) = opt(cmp_op).parse_next(input)? {
        ws_skip.parse_next(input)?;
        let right = cut_err(add_expr).parse_next(input)?;
        return Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
    }
    Ok(left)
}

fn cmp_op(input: &mut &str) -> ModalResult<BinOp> {
    alt((
        literal("==").value(BinOp::Eq),
        literal("!=").value(BinOp::Ne),
        literal("<=").value(BinOp::Le),
        literal(">=").value(BinOp::Ge),
        literal("<").value(BinOp::Lt),
        literal(">").value(BinOp::Gt),
    ))
    .parse_next(input)
}

/// `add_expr = mul_expr { ("+" | "-") mul_expr }`
fn add_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = mul_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("+").value(BinOp::Add),
            literal("-").value(BinOp::Sub),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(mul_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `mul_expr = unary_expr { ("*" | "/" | "%") unary_expr }`
fn mul_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = unary_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("*").value(BinOp::Mul),
            literal("/").value(BinOp::Div),
            literal("%").value(BinOp::Mod),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(unary_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `unary_expr = ["-"] primary`
fn unary_expr(input: &mut &str) -> ModalResult<Expr> {
    if opt(literal("-")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = primary.parse_next(input)?;
        Ok(Expr::Neg(Box::new(inner)))
    } else {
        primary.parse_next(input)
    }
}

// ---------------------------------------------------------------------------
// Primary
// ---------------------------------------------------------------------------

fn primary(input: &mut &str) -> ModalResult<Expr> {
    alt((
        number_literal.map(Expr::Number),
        quoted_string.map(Expr::StringLit),
        kw("true").map(|_| Expr::Bool(true)),
        kw("false").map(|_| Expr::Bool(false)),
        paren_expr,
        ident_primary,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    literal("(").parse_next(input)?;
    ws_skip.parse_next(input)?;
    let inner = cut_err(parse_expr).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;
    Ok(inner)
}

/// Parse an ident-based primary: whitelisted function call or sensor
/// reference (`name`, `ns:name`, with optional `.prop` path segments).
fn ident_primary(input: &mut &str) -> ModalResult<Expr> {
    let first = ident.parse_next(input)?;

    // first( ... ) → function call
    if input.starts_with('(') {
        if !FUNCTION_WHITELIST.contains(&first) {
            return Err(ErrMode::Cut(ContextError::new()));
        }
        literal("(").parse_next(input)?;
        return parse_func_call_args(first.to_string(), input);
    }

    // ns:name → namespaced sensor key
    let key = if opt(literal(":")).parse_next(input)?.is_some() {
        let name = cut_err(ident).parse_next(input)?;
        format!("{first}:{name}")
    } else {
        first.to_string()
    };

    // Optional `.prop.path` into an object value.
    let mut path = Vec::new();
    while opt(literal(".")).parse_next(input)?.is_some() {
        let seg = cut_err(ident).parse_next(input)?;
        path.push(seg.to_string());
    }

    Ok(Expr::Sensor(SensorRef { key, path }))
}

fn parse_func_call_args(name: String, input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;

    if opt(literal(")")).parse_next(input)?.is_some() {
        return Ok(Expr::FuncCall { name, args: vec![] });
    }

    let args: Vec<Expr> =
        separated(1.., (ws_skip, parse_expr).map(|(_, e)| e), literal(",")).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;

    Ok(Expr::FuncCall { name, args })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(key: &str) -> Expr {
        Expr::Sensor(SensorRef::bare(key))
    }

    #[test]
    fn parse_comparison() {
        let e = parse_expr_str("input:temperature > 30").unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Gt,
                left: Box::new(sensor("input:temperature")),
                right: Box::new(Expr::Number(30.0)),
            }
        );
    }

    #[test]
    fn parse_arithmetic_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let e = parse_expr_str("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Add,
                left: Box::new(Expr::Number(1.0)),
                right: Box::new(Expr::BinOp {
                    op: BinOp::Mul,
                    left: Box::new(Expr::Number(2.0)),
                    right: Box::new(Expr::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn parse_keyword_and_symbolic_bool_ops() {
        let kw_form = parse_expr_str("input:a > 0 and not input:b").unwrap();
        let sym_form = parse_expr_str("input:a > 0 && !input:b").unwrap();
        assert_eq!(kw_form, sym_form);
    }

    #[test]
    fn parse_or_binds_looser_than_and() {
        // a or b and c == a or (b and c)
        let e = parse_expr_str("input:a or input:b and input:c").unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(sensor("input:a")),
                right: Box::new(Expr::BinOp {
                    op: BinOp::And,
                    left: Box::new(sensor("input:b")),
                    right: Box::new(sensor("input:c")),
                }),
            }
        );
    }

    #[test]
    fn parse_sensor_with_property_path() {
        let e = parse_expr_str("input:env.humidity.rel").unwrap();
        assert_eq!(
            e,
            Expr::Sensor(SensorRef {
                key: "input:env".to_string(),
                path: vec!["humidity".to_string(), "rel".to_string()],
            })
        );
    }

    #[test]
    fn parse_function_call() {
        let e = parse_expr_str("max(input:a, 0) / 100").unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Div,
                left: Box::new(Expr::FuncCall {
                    name: "max".to_string(),
                    args: vec![sensor("input:a"), Expr::Number(0.0)],
                }),
                right: Box::new(Expr::Number(100.0)),
            }
        );
    }

    #[test]
    fn parse_nullary_function() {
        let e = parse_expr_str("now()").unwrap();
        assert_eq!(
            e,
            Expr::FuncCall {
                name: "now".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn reject_unknown_function() {
        assert!(parse_expr_str("eval(1)").is_err());
    }

    #[test]
    fn reject_trailing_garbage() {
        assert!(parse_expr_str("1 + 2 @").is_err());
    }

    #[test]
    fn parse_parenthesized_and_negation() {
        let e = parse_expr_str("-(input:a + 1)").unwrap();
        assert_eq!(
            e,
            Expr::Neg(Box::new(Expr::BinOp {
                op: BinOp::Add,
                left: Box::new(sensor("input:a")),
                right: Box::new(Expr::Number(1.0)),
            }))
        );
    }

    #[test]
    fn parse_string_literals_both_quotes() {
        assert_eq!(
            parse_expr_str(r#"input:mode == "eco""#).unwrap(),
            parse_expr_str("input:mode == 'eco'").unwrap(),
        );
    }

    #[test]
    fn keyword_prefix_identifiers_are_sensors() {
        // `android` starts with `and` but must parse as a sensor name.
        let e = parse_expr_str("android > 1").unwrap();
        assert_eq!(
            e,
            Expr::BinOp {
                op: BinOp::Gt,
                left: Box::new(sensor("android")),
                right: Box::new(Expr::Number(1.0)),
            }
        );
    }
}
