use flint_common::{ExprId, FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::{AggregateKind, AggregateMode, Expr, SortOrder};
use crate::logical_plan::LogicalPlan;
use crate::rules::ordinals::has_aggregate;

/// Bind `UnresolvedFunction` / `UnresolvedGenerator` through the catalog once
/// their arguments are resolved, wrapping plain aggregates in
/// `AggregateExpression`.
pub struct ResolveFunctions;

impl AnalyzerRule for ResolveFunctions {
    fn name(&self) -> &str {
        "resolve-functions"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.children_resolved() {
                return Ok(p);
            }
            p.map_expressions(&mut |e| {
                e.transform_up(&mut |e| match e {
                    Expr::UnresolvedGenerator { name, args }
                        if args.iter().all(|a| a.resolved()) =>
                    {
                        match lookup(ctx, &name, args)? {
                            bound @ Expr::Generator { .. } => Ok(bound),
                            _ => Err(FlintError::analysis(format!(
                                "'{name}' is expected to be a generator"
                            ))),
                        }
                    }
                    Expr::UnresolvedFunction {
                        name,
                        args,
                        distinct,
                    } if args.iter().all(|a| a.resolved()) => {
                        let bound = lookup(ctx, &name, args)?;
                        match bound {
                            // DISTINCT is redundant for min/max.
                            Expr::AggregateFunction {
                                kind: kind @ (AggregateKind::Min | AggregateKind::Max),
                                args,
                                ignore_nulls,
                            } => Ok(aggregate_expression(
                                Expr::AggregateFunction {
                                    kind,
                                    args,
                                    ignore_nulls,
                                },
                                false,
                            )),
                            func @ Expr::AggregateFunction { .. } => {
                                Ok(aggregate_expression(func, distinct))
                            }
                            // Window functions stay bare; they live inside a
                            // WindowExpression.
                            func @ Expr::WindowFunction { .. } => Ok(func),
                            other if distinct => Err(FlintError::analysis(format!(
                                "DISTINCT specified, but {} is not an aggregate function",
                                format_expr(&other)
                            ))),
                            other => Ok(other),
                        }
                    }
                    other => Ok(other),
                })
            })
        })
    }
}

fn lookup(ctx: &AnalyzerContext<'_>, name: &str, args: Vec<Expr>) -> Result<Expr> {
    match ctx.catalog.lookup_function(name, args) {
        Ok(bound) => Ok(bound),
        Err(FlintError::NoSuchFunction(n)) => {
            Err(FlintError::analysis(format!("Undefined function: '{n}'")))
        }
        Err(e) => Err(e),
    }
}

fn aggregate_expression(func: Expr, distinct: bool) -> Expr {
    Expr::AggregateExpression {
        func: Box::new(func),
        mode: AggregateMode::Complete,
        distinct,
        result_id: ExprId::fresh(),
    }
}

/// Name the unnamed: turn `UnresolvedAlias` wrappers over resolved children
/// into concrete aliases (or drop them for already-named expressions).
pub struct ResolveAliases;

impl AnalyzerRule for ResolveAliases {
    fn name(&self) -> &str {
        "resolve-aliases"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Project { list, input } => Ok(LogicalPlan::Project {
                list: assign_names(list),
                input,
            }),
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            } => Ok(LogicalPlan::Aggregate {
                grouping,
                aggregates: assign_names(aggregates),
                input,
            }),
            LogicalPlan::Window {
                window_exprs,
                partition_by,
                order_by,
                input,
            } => Ok(LogicalPlan::Window {
                window_exprs: assign_names(window_exprs),
                partition_by,
                order_by,
                input,
            }),
            LogicalPlan::GroupingSets {
                bitmasks,
                group_by,
                aggregates,
                input,
            } => Ok(LogicalPlan::GroupingSets {
                bitmasks,
                group_by,
                aggregates: assign_names(aggregates),
                input,
            }),
            LogicalPlan::Pivot {
                group_by,
                pivot_column,
                pivot_values,
                aggregates,
                input,
            } => Ok(LogicalPlan::Pivot {
                group_by: assign_names(group_by),
                pivot_column,
                pivot_values,
                aggregates,
                input,
            }),
            other => Ok(other),
        })
    }
}

fn assign_names(list: Vec<Expr>) -> Vec<Expr> {
    list.into_iter()
        .map(|item| match item {
            Expr::UnresolvedAlias { child } if child.resolved() => name_expression(*child),
            other => other,
        })
        .collect()
}

fn name_expression(e: Expr) -> Expr {
    match e {
        named @ (Expr::Attribute(_) | Expr::Alias { .. }) => named,
        // Generators are named by the generator relocation rule, from their
        // own output schema.
        generator @ Expr::Generator { .. } => Expr::MultiAlias {
            child: Box::new(generator),
            names: vec![],
        },
        // Time windows desugar into a struct column named "window".
        window @ Expr::TimeWindow { .. } => window.alias("window"),
        // Casting an attribute keeps its name.
        Expr::Cast { expr, to_type } if matches!(*expr, Expr::Attribute(_)) => {
            let name = expr.name().unwrap_or_default();
            Expr::Cast { expr, to_type }.alias(name)
        }
        Expr::GetStructField {
            child,
            ordinal,
            name,
        } => {
            let field_name = name.clone();
            Expr::GetStructField {
                child,
                ordinal,
                name,
            }
            .alias(field_name)
        }
        other => {
            let name = format_expr(&other);
            other.alias(name)
        }
    }
}

/// A projection that computes an aggregate with no GROUP BY is a global
/// aggregate over the whole input.
pub struct GlobalAggregates;

impl AnalyzerRule for GlobalAggregates {
    fn name(&self) -> &str {
        "global-aggregates"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Project { list, input }
                if list.iter().any(has_aggregate_outside_window) =>
            {
                Ok(LogicalPlan::Aggregate {
                    grouping: vec![],
                    aggregates: list,
                    input,
                })
            }
            other => Ok(other),
        })
    }
}

/// True when the expression computes an aggregate that is not wrapped in a
/// window expression.
fn has_aggregate_outside_window(e: &Expr) -> bool {
    match e {
        Expr::WindowExpression { .. } => false,
        Expr::AggregateExpression { .. } => true,
        other => other.children().iter().any(|c| has_aggregate_outside_window(c)),
    }
}

/// HAVING conditions and ORDER BY keys that mention aggregates are evaluated
/// by the aggregate below: resolve them against the aggregate's child via a
/// speculative analysis, push the aggregate parts into the aggregate list,
/// and strip the extra columns with an outer projection.
pub struct ResolveAggregateFunctions;

impl AnalyzerRule for ResolveAggregateFunctions {
    fn name(&self) -> &str {
        "resolve-aggregate-functions"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Filter { condition, input }
                if matches!(*input, LogicalPlan::Aggregate { .. })
                    && input.resolved()
                    && !condition.resolved() =>
            {
                rewrite_having(condition, *input, ctx)
            }
            LogicalPlan::Sort {
                order,
                global,
                input,
            } if matches!(*input, LogicalPlan::Aggregate { .. })
                && input.resolved()
                && order
                    .iter()
                    .any(|s| !s.expr.resolved() || has_aggregate(&s.expr)) =>
            {
                rewrite_sort_over_aggregate(order, global, *input, ctx)
            }
            other => Ok(other),
        })
    }
}

fn rewrite_having(
    condition: Expr,
    agg: LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<LogicalPlan> {
    let original = || LogicalPlan::Filter {
        condition: condition.clone(),
        input: Box::new(agg.clone()),
    };
    let LogicalPlan::Aggregate {
        grouping,
        aggregates,
        input,
    } = agg.clone()
    else {
        return Ok(original());
    };

    let trial = LogicalPlan::Aggregate {
        grouping: grouping.clone(),
        aggregates: vec![condition.clone().alias("havingCondition")],
        input: input.clone(),
    };
    let Some(resolved_op) = ctx.try_execute(trial)? else {
        return Ok(original());
    };
    if !resolved_op.resolved() {
        return Ok(original());
    }
    let LogicalPlan::Aggregate {
        aggregates: mut trial_aggs,
        ..
    } = resolved_op
    else {
        return Ok(original());
    };
    let Some(Expr::Alias {
        child: resolved_condition,
        ..
    }) = trial_aggs.pop()
    else {
        return Ok(original());
    };
    if !has_aggregate(&resolved_condition) {
        // Plain condition over the aggregate output; regular reference
        // resolution handles it.
        return Ok(original());
    }

    let mut pushed: Vec<Expr> = Vec::new();
    let new_condition = (*resolved_condition).transform_down(&mut |e| match e {
        agg_expr @ Expr::AggregateExpression { .. } => {
            let alias = agg_expr.clone().alias(format_expr(&agg_expr));
            let attr = alias
                .to_attribute()
                .ok_or_else(|| FlintError::Internal("untyped pushed aggregate".to_string()))?;
            pushed.push(alias);
            Ok(Expr::Attribute(attr))
        }
        other => Ok(other),
    })?;

    let mut new_aggregates = aggregates;
    new_aggregates.extend(pushed);
    let output = agg.output();
    Ok(LogicalPlan::project_attrs(
        &output,
        LogicalPlan::Filter {
            condition: new_condition,
            input: Box::new(LogicalPlan::Aggregate {
                grouping,
                aggregates: new_aggregates,
                input,
            }),
        },
    ))
}

fn rewrite_sort_over_aggregate(
    order: Vec<SortOrder>,
    global: bool,
    agg: LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<LogicalPlan> {
    let original = || LogicalPlan::Sort {
        order: order.clone(),
        global,
        input: Box::new(agg.clone()),
    };
    let LogicalPlan::Aggregate {
        grouping,
        aggregates,
        input,
    } = agg.clone()
    else {
        return Ok(original());
    };

    let pending: Vec<usize> = order
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.expr.resolved() || has_aggregate(&s.expr))
        .map(|(i, _)| i)
        .collect();
    let aliased: Vec<Expr> = pending
        .iter()
        .map(|i| order[*i].expr.clone().alias("aggOrder"))
        .collect();

    let trial = LogicalPlan::Aggregate {
        grouping: grouping.clone(),
        aggregates: aliased,
        input: input.clone(),
    };
    let Some(resolved_op) = ctx.try_execute(trial)? else {
        return Ok(original());
    };
    let LogicalPlan::Aggregate {
        aggregates: resolved_aliases,
        ..
    } = resolved_op
    else {
        return Ok(original());
    };
    if resolved_aliases.iter().any(|a| !a.resolved()) {
        return Ok(original());
    }

    // A key identical to an existing aggregate column reuses it; the rest
    // are pushed down as fresh aliases.
    let mut push_down: Vec<Expr> = Vec::new();
    let mut new_order = order.clone();
    for (position, resolved_alias) in pending.iter().zip(resolved_aliases) {
        let Expr::Alias {
            child: evaluated, ..
        } = &resolved_alias
        else {
            return Ok(original());
        };
        let existing = aggregates.iter().find(|a| match a {
            Expr::Alias { child, .. } => child.semantic_eq(evaluated),
            other => other.semantic_eq(evaluated),
        });
        let attr = match existing {
            Some(item) => item.to_attribute(),
            None => {
                let attr = resolved_alias.to_attribute();
                push_down.push(resolved_alias.clone());
                attr
            }
        };
        let Some(attr) = attr else {
            return Ok(original());
        };
        new_order[*position] = new_order[*position].with_expr(Expr::Attribute(attr));
    }

    if new_order == order {
        return Ok(original());
    }
    let mut new_aggregates = aggregates;
    new_aggregates.extend(push_down);
    let output = agg.output();
    Ok(LogicalPlan::project_attrs(
        &output,
        LogicalPlan::Sort {
            order: new_order,
            global,
            input: Box::new(LogicalPlan::Aggregate {
                grouping,
                aggregates: new_aggregates,
                input,
            }),
        },
    ))
}
