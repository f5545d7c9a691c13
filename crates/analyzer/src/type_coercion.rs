//! The type-coercion ruleset consumed by the Resolution batch.
//!
//! The analyzer appends these rules verbatim after the structural rules and
//! never inspects or reorders them; callers may swap the list for their own.

use std::sync::Arc;

use arrow_schema::DataType;
use flint_common::Result;

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::expr::{BinaryOp, Expr, LiteralValue};
use crate::logical_plan::LogicalPlan;

/// The default coercion rules.
pub fn default_rules() -> Vec<Arc<dyn AnalyzerRule>> {
    vec![Arc::new(ImplicitTypeCasts)]
}

/// Insert casts so binary operations and conditionals see matching operand
/// types: numeric operands widen to the larger type, division always runs
/// over floats, and typed nulls take the other side's type.
struct ImplicitTypeCasts;

impl AnalyzerRule for ImplicitTypeCasts {
    fn name(&self) -> &str {
        "implicit-type-casts"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.children_resolved() {
                return Ok(p);
            }
            p.map_expressions(&mut |e| {
                e.transform_up(&mut |e| match e {
                    Expr::BinaryOp { left, op, right } if left.resolved() && right.resolved() => {
                        coerce_binary(*left, op, *right)
                    }
                    Expr::If {
                        condition,
                        then_expr,
                        else_expr,
                    } if then_expr.resolved() && else_expr.resolved() => {
                        let (then_expr, else_expr) = unify_pair(*then_expr, *else_expr)?;
                        Ok(Expr::If {
                            condition,
                            then_expr: Box::new(then_expr),
                            else_expr: Box::new(else_expr),
                        })
                    }
                    other => Ok(other),
                })
            })
        })
    }
}

fn coerce_binary(left: Expr, op: BinaryOp, right: Expr) -> Result<Expr> {
    let rebuilt = |l: Expr, r: Expr| Expr::binary(l, op, r);

    if op == BinaryOp::Divide {
        let lt = left.data_type()?;
        let rt = right.data_type()?;
        if is_numeric(&lt) && is_numeric(&rt) {
            return Ok(rebuilt(
                cast_if_needed(left, &lt, &DataType::Float64),
                cast_if_needed(right, &rt, &DataType::Float64),
            ));
        }
        return Ok(rebuilt(left, right));
    }

    let (left, right) = unify_pair(left, right)?;
    Ok(rebuilt(left, right))
}

fn unify_pair(left: Expr, right: Expr) -> Result<(Expr, Expr)> {
    let lt = left.data_type()?;
    let rt = right.data_type()?;
    if lt == rt {
        return Ok((left, right));
    }
    if is_null_literal(&left) {
        let casted = cast_if_needed(left, &lt, &rt);
        return Ok((casted, right));
    }
    if is_null_literal(&right) {
        let casted = cast_if_needed(right, &rt, &lt);
        return Ok((left, casted));
    }
    if is_numeric(&lt) && is_numeric(&rt) {
        if let Some(target) = wider_numeric(&lt, &rt) {
            return Ok((
                cast_if_needed(left, &lt, &target),
                cast_if_needed(right, &rt, &target),
            ));
        }
    }
    Ok((left, right))
}

fn is_null_literal(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Literal {
            value: LiteralValue::Null,
            ..
        }
    )
}

fn is_numeric(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn numeric_rank(dt: &DataType) -> Option<u8> {
    Some(match dt {
        DataType::Int8 | DataType::UInt8 => 1,
        DataType::Int16 | DataType::UInt16 => 2,
        DataType::Int32 | DataType::UInt32 => 3,
        DataType::Int64 | DataType::UInt64 => 4,
        DataType::Float32 => 5,
        DataType::Float64 => 6,
        _ => return None,
    })
}

fn wider_numeric(a: &DataType, b: &DataType) -> Option<DataType> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    if ra >= rb {
        Some(a.clone())
    } else {
        Some(b.clone())
    }
}

fn cast_if_needed(expr: Expr, from: &DataType, to: &DataType) -> Expr {
    if from == to {
        expr
    } else {
        expr.cast(to.clone())
    }
}
