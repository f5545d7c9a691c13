use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::expr::{AttributeSet, Expr, LiteralValue, SortOrder};
use crate::logical_plan::LogicalPlan;
use crate::rules::references::resolve_expression;

/// Bind integer literals in ORDER BY / GROUP BY to select-list positions.
pub struct ResolveOrdinals;

impl AnalyzerRule for ResolveOrdinals {
    fn name(&self) -> &str {
        "resolve-ordinals"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Sort {
                order,
                global,
                input,
            } if ctx.config.order_by_ordinal
                && input.resolved()
                && order.iter().any(|s| ordinal_of(&s.expr).is_some()) =>
            {
                let output = input.output();
                let order = order
                    .into_iter()
                    .map(|s| match ordinal_of(&s.expr) {
                        Some(k) => {
                            if k < 1 || k as usize > output.len() {
                                Err(FlintError::analysis(format!(
                                    "ORDER BY position {k} is not in select list (valid range is [1, {}])",
                                    output.len()
                                )))
                            } else {
                                let attr = output[k as usize - 1].clone();
                                Ok(s.with_expr(Expr::Attribute(attr)))
                            }
                        }
                        None => Ok(s),
                    })
                    .collect::<Result<Vec<SortOrder>>>()?;
                Ok(LogicalPlan::Sort {
                    order,
                    global,
                    input,
                })
            }
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            } if ctx.config.group_by_ordinal
                && aggregates.iter().all(|a| a.resolved())
                && grouping.iter().any(|g| ordinal_of(g).is_some()) =>
            {
                let grouping = grouping
                    .into_iter()
                    .map(|g| match ordinal_of(&g) {
                        Some(k) => {
                            if k < 1 || k as usize > aggregates.len() {
                                return Err(FlintError::analysis(format!(
                                    "GROUP BY position {k} is not in select list (valid range is [1, {}])",
                                    aggregates.len()
                                )));
                            }
                            let target = &aggregates[k as usize - 1];
                            if has_aggregate(target) {
                                return Err(FlintError::analysis(format!(
                                    "GROUP BY position {k} is an aggregate function, and aggregate functions are not allowed in GROUP BY"
                                )));
                            }
                            Ok(target.clone())
                        }
                        None => Ok(g),
                    })
                    .collect::<Result<Vec<Expr>>>()?;
                Ok(LogicalPlan::Aggregate {
                    grouping,
                    aggregates,
                    input,
                })
            }
            other => Ok(other),
        })
    }
}

fn ordinal_of(e: &Expr) -> Option<i64> {
    match e {
        Expr::Literal {
            value: LiteralValue::Int64(k),
            ..
        } => Some(*k),
        _ => None,
    }
}

pub(crate) fn has_aggregate(e: &Expr) -> bool {
    e.exists(&mut |x| matches!(x, Expr::AggregateExpression { .. }))
}

/// Resolve Sort/Filter expressions that reference columns hidden below the
/// child, then lift those columns up through the intermediate operators and
/// strip them again above.
///
/// Sorts and filters directly over an `Aggregate` are left for the aggregate
/// pushdown rule.
pub struct ResolveMissingReferences;

impl AnalyzerRule for ResolveMissingReferences {
    fn name(&self) -> &str {
        "resolve-missing-references"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Sort {
                order,
                global,
                input,
            } if input.resolved()
                && !matches!(*input, LogicalPlan::Aggregate { .. })
                && order.iter().any(|s| !s.expr.resolved()) =>
            {
                let original = LogicalPlan::Sort {
                    order: order.clone(),
                    global,
                    input: input.clone(),
                };
                match lift_into_sort(order, global, *input, ctx) {
                    Ok(rewritten) => Ok(rewritten),
                    Err(FlintError::Analysis(_)) => Ok(original),
                    Err(e) => Err(e),
                }
            }
            LogicalPlan::Filter { condition, input }
                if input.resolved()
                    && !matches!(*input, LogicalPlan::Aggregate { .. })
                    && !condition.resolved() =>
            {
                let original = LogicalPlan::Filter {
                    condition: condition.clone(),
                    input: input.clone(),
                };
                match lift_into_filter(condition, *input, ctx) {
                    Ok(rewritten) => Ok(rewritten),
                    Err(FlintError::Analysis(_)) => Ok(original),
                    Err(e) => Err(e),
                }
            }
            other => Ok(other),
        })
    }
}

fn lift_into_sort(
    order: Vec<SortOrder>,
    global: bool,
    input: LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<LogicalPlan> {
    let new_order = order
        .into_iter()
        .map(|s| {
            let SortOrder { expr, direction } = s;
            Ok(SortOrder {
                expr: resolve_recursively(expr, &input, ctx)?,
                direction,
            })
        })
        .collect::<Result<Vec<SortOrder>>>()?;

    let mut refs = AttributeSet::default();
    for s in &new_order {
        refs = refs.union(&s.expr.references());
    }
    let missing = refs.subtract(&input.output_set());
    if missing.is_empty() {
        return Ok(LogicalPlan::Sort {
            order: new_order,
            global,
            input: Box::new(input),
        });
    }

    let original_output = input.output();
    let lifted = add_missing_attrs(input, &missing)?;
    Ok(LogicalPlan::project_attrs(
        &original_output,
        LogicalPlan::Sort {
            order: new_order,
            global,
            input: Box::new(lifted),
        },
    ))
}

fn lift_into_filter(
    condition: Expr,
    input: LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<LogicalPlan> {
    let condition = resolve_recursively(condition, &input, ctx)?;
    let missing = condition.references().subtract(&input.output_set());
    if missing.is_empty() {
        return Ok(LogicalPlan::Filter {
            condition,
            input: Box::new(input),
        });
    }

    let original_output = input.output();
    let lifted = add_missing_attrs(input, &missing)?;
    Ok(LogicalPlan::project_attrs(
        &original_output,
        LogicalPlan::Filter {
            condition,
            input: Box::new(lifted),
        },
    ))
}

/// Resolve against the plan's output, then keep descending through unary
/// children until something binds. `SubqueryAlias` is a scope boundary.
fn resolve_recursively(
    e: Expr,
    plan: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<Expr> {
    let resolved = resolve_expression(e, &plan.output(), &ctx.resolver)?;
    if resolved.resolved() {
        return Ok(resolved);
    }
    if matches!(plan, LogicalPlan::SubqueryAlias { .. }) {
        return Ok(resolved);
    }
    match plan.children().as_slice() {
        [only] => resolve_recursively(resolved, only, ctx),
        _ => Ok(resolved),
    }
}

/// Extend the plan so that `missing` attributes flow up to its output.
fn add_missing_attrs(plan: LogicalPlan, missing: &AttributeSet) -> Result<LogicalPlan> {
    if missing.is_empty() {
        return Ok(plan);
    }
    match plan {
        LogicalPlan::Project { mut list, input } => {
            let provided = input.output_set();
            let deeper = missing.subtract(&provided);
            let input = if deeper.is_empty() {
                input
            } else {
                Box::new(add_missing_attrs(*input, &deeper)?)
            };
            list.extend(missing.iter().cloned().map(Expr::Attribute));
            Ok(LogicalPlan::Project { list, input })
        }
        LogicalPlan::Aggregate {
            grouping,
            mut aggregates,
            input,
        } => {
            for attr in missing.iter() {
                let as_expr = Expr::Attribute(attr.clone());
                if !grouping.iter().any(|g| g.semantic_eq(&as_expr)) {
                    return Err(FlintError::analysis(format!(
                        "expression '{}' is neither present in the group by, nor is it an aggregate function",
                        attr.qualified_name()
                    )));
                }
                aggregates.push(as_expr);
            }
            Ok(LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            })
        }
        LogicalPlan::Generate {
            generator,
            join,
            outer,
            qualifier,
            generator_output,
            input,
        } => Ok(LogicalPlan::Generate {
            generator,
            join,
            outer,
            qualifier,
            generator_output,
            input: Box::new(add_missing_attrs(*input, missing)?),
        }),
        LogicalPlan::Filter { condition, input } => Ok(LogicalPlan::Filter {
            condition,
            input: Box::new(add_missing_attrs(*input, missing)?),
        }),
        LogicalPlan::Sort {
            order,
            global,
            input,
        } => Ok(LogicalPlan::Sort {
            order,
            global,
            input: Box::new(add_missing_attrs(*input, missing)?),
        }),
        other => Err(FlintError::analysis(format!(
            "cannot lift missing attributes through operator {}",
            other.node_name()
        ))),
    }
}
