use arrow_schema::DataType;
use flint_common::{ExprId, FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::{AggregateKind, AttributeRef, BinaryOp, Expr};
use crate::logical_plan::LogicalPlan;

/// Desugar Cube/Rollup into `GroupingSets`, and `GroupingSets` into
/// `Expand` + `Aggregate` with a synthetic grouping-id column.
///
/// Bitmask convention: bit `n-1-i` set means grouping column `i` is nulled
/// out in that grouping set; the grouping-id value is the mask itself.
pub struct ResolveGroupingAnalytics;

impl AnalyzerRule for ResolveGroupingAnalytics {
    fn name(&self) -> &str {
        "resolve-grouping-analytics"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.children_resolved() {
                return Ok(p);
            }
            match p {
                LogicalPlan::Aggregate {
                    grouping,
                    aggregates,
                    input,
                } if grouping.len() == 1 && matches!(grouping[0], Expr::Cube { .. }) => {
                    let Expr::Cube { exprs } = grouping.into_iter().next().unwrap() else {
                        unreachable!()
                    };
                    let n = exprs.len() as u32;
                    Ok(LogicalPlan::GroupingSets {
                        bitmasks: (0..(1u64 << n)).collect(),
                        group_by: exprs,
                        aggregates,
                        input,
                    })
                }
                LogicalPlan::Aggregate {
                    grouping,
                    aggregates,
                    input,
                } if grouping.len() == 1 && matches!(grouping[0], Expr::Rollup { .. }) => {
                    let Expr::Rollup { exprs } = grouping.into_iter().next().unwrap() else {
                        unreachable!()
                    };
                    let n = exprs.len() as u32;
                    Ok(LogicalPlan::GroupingSets {
                        bitmasks: (0..=n).map(|i| (1u64 << i) - 1).collect(),
                        group_by: exprs,
                        aggregates,
                        input,
                    })
                }
                LogicalPlan::Aggregate {
                    ref grouping,
                    ref aggregates,
                    ..
                } if grouping
                    .iter()
                    .chain(aggregates.iter())
                    .any(|e| e.exists(&mut is_grouping_function)) =>
                {
                    Err(FlintError::analysis(
                        "grouping()/grouping_id() can only be used with GroupingSets/Cube/Rollup",
                    ))
                }
                LogicalPlan::GroupingSets {
                    bitmasks,
                    group_by,
                    aggregates,
                    input,
                } if group_by.iter().all(|e| e.resolved())
                    && aggregates.iter().all(|e| e.resolved()) =>
                {
                    desugar_grouping_sets(bitmasks, group_by, aggregates, *input)
                }
                other => Ok(other),
            }
        })
    }
}

fn is_grouping_function(e: &Expr) -> bool {
    matches!(e, Expr::Grouping { .. } | Expr::GroupingId { .. })
}

fn desugar_grouping_sets(
    bitmasks: Vec<u64>,
    group_by: Vec<Expr>,
    aggregates: Vec<Expr>,
    input: LogicalPlan,
) -> Result<LogicalPlan> {
    let n = group_by.len();
    if n > 63 {
        return Err(FlintError::analysis(
            "Grouping sets size cannot be greater than 63",
        ));
    }

    // One alias per grouping expression; the Expand output reuses its id.
    let aliases: Vec<Expr> = group_by
        .iter()
        .map(|e| match e {
            Expr::Attribute(a) => e.clone().alias(a.name.clone()),
            other => other.clone().alias(format_expr(other)),
        })
        .collect();
    let alias_attrs: Vec<AttributeRef> = aliases
        .iter()
        .map(|a| {
            a.to_attribute()
                .ok_or_else(|| FlintError::Internal("untyped grouping alias".to_string()))
        })
        .collect::<Result<_>>()?;

    // A grouping column is nullable unless it survives every grouping set.
    let expanded_attrs: Vec<AttributeRef> = alias_attrs
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let bit = 1u64 << (n - 1 - i);
            let nulled_somewhere = bitmasks.iter().any(|mask| mask & bit != 0);
            a.clone().with_nullable(a.nullable || nulled_somewhere)
        })
        .collect();
    let gid = AttributeRef::new("grouping_id", DataType::Int64, false);

    let child_output = input.output();
    let projections: Vec<Vec<Expr>> = bitmasks
        .iter()
        .map(|mask| {
            let mut row: Vec<Expr> = child_output
                .iter()
                .cloned()
                .map(Expr::Attribute)
                .collect();
            for (i, alias) in aliases.iter().enumerate() {
                let bit = 1u64 << (n - 1 - i);
                if mask & bit != 0 {
                    row.push(Expr::null(alias_attrs[i].data_type.clone()));
                } else {
                    row.push(alias.clone());
                }
            }
            row.push(Expr::int(*mask as i64));
            row
        })
        .collect();

    let mut expand_output = child_output;
    expand_output.extend(expanded_attrs.iter().cloned());
    expand_output.push(gid.clone());
    let expand = LogicalPlan::Expand {
        projections,
        output: expand_output,
        input: Box::new(input),
    };

    let rewritten_aggs = aggregates
        .into_iter()
        .map(|a| rewrite_aggregate_expr(a, &group_by, &expanded_attrs, &gid, n))
        .collect::<Result<Vec<Expr>>>()?;

    let mut new_grouping: Vec<Expr> = expanded_attrs
        .iter()
        .cloned()
        .map(Expr::Attribute)
        .collect();
    new_grouping.push(Expr::Attribute(gid.clone()));

    Ok(LogicalPlan::Aggregate {
        grouping: new_grouping,
        aggregates: rewritten_aggs,
        input: Box::new(expand),
    })
}

/// Rewrite one aggregate-list item: ungrouped references to grouping
/// expressions become the Expand-produced columns, `grouping()` becomes a
/// bit probe of the grouping id, and aggregate arguments stay untouched
/// (they read the pre-expand columns, which Expand passes through).
fn rewrite_aggregate_expr(
    e: Expr,
    group_by: &[Expr],
    expanded: &[AttributeRef],
    gid: &AttributeRef,
    n: usize,
) -> Result<Expr> {
    match e {
        Expr::AggregateExpression { .. } => Ok(e),
        Expr::Grouping { child } => {
            let idx = group_by
                .iter()
                .position(|g| g.semantic_eq(&child))
                .ok_or_else(|| {
                    FlintError::analysis(format!(
                        "Column of grouping ({}) can't be found in grouping columns {}",
                        format_expr(&child),
                        group_by
                            .iter()
                            .map(format_expr)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                })?;
            let shifted = Expr::binary(
                Expr::Attribute(gid.clone()),
                BinaryOp::ShiftRight,
                Expr::int((n - 1 - idx) as i64),
            );
            Ok(Expr::binary(shifted, BinaryOp::BitAnd, Expr::int(1)).cast(DataType::Int8))
        }
        Expr::GroupingId { children } => {
            let matches_grouping = children.len() == group_by.len()
                && children
                    .iter()
                    .zip(group_by.iter())
                    .all(|(c, g)| c.semantic_eq(g));
            if !children.is_empty() && !matches_grouping {
                return Err(FlintError::analysis(format!(
                    "Columns of grouping_id ({}) does not match grouping columns ({})",
                    children.iter().map(format_expr).collect::<Vec<_>>().join(", "),
                    group_by.iter().map(format_expr).collect::<Vec<_>>().join(", ")
                )));
            }
            Ok(Expr::Attribute(gid.clone()))
        }
        other => {
            if let Some(idx) = group_by.iter().position(|g| g.semantic_eq(&other)) {
                return Ok(Expr::Attribute(expanded[idx].clone()));
            }
            // Alias wrappers keep their name and id while the child is
            // rewritten underneath.
            if let Expr::Alias { child, name, id } = other {
                let child = rewrite_aggregate_expr(*child, group_by, expanded, gid, n)?;
                return Ok(Expr::Alias {
                    child: Box::new(child),
                    name,
                    id,
                });
            }
            other.map_children(&mut |c| rewrite_aggregate_expr(c, group_by, expanded, gid, n))
        }
    }
}

/// Desugar `Pivot` into an aggregate whose columns evaluate each aggregate
/// against rows matching each pivot value.
pub struct ResolvePivot;

impl AnalyzerRule for ResolvePivot {
    fn name(&self) -> &str {
        "resolve-pivot"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Pivot {
                group_by,
                pivot_column,
                pivot_values,
                aggregates,
                input,
            } if p_ready(&group_by, &pivot_column, &aggregates, &input) => {
                let single = aggregates.len() == 1;
                let pivot_type = pivot_column.data_type()?;
                let mut pivot_aggs: Vec<Expr> = Vec::new();
                for value in &pivot_values {
                    let value_literal = Expr::Literal {
                        value: value.clone(),
                        data_type: pivot_type.clone(),
                    };
                    for aggregate in &aggregates {
                        let filtered =
                            filter_by_pivot_value(aggregate.clone(), &pivot_column, &value_literal)?;
                        if filtered == *aggregate {
                            return Err(FlintError::analysis(format!(
                                "Aggregate expression required for pivot, found '{}'",
                                format_expr(aggregate)
                            )));
                        }
                        let freshened = freshen_result_ids(filtered)?;
                        let name = if single {
                            value.render()
                        } else {
                            format!("{}_{}", value.render(), format_expr(aggregate))
                        };
                        pivot_aggs.push(freshened.alias(name));
                    }
                }
                let mut output = group_by.clone();
                output.extend(pivot_aggs);
                Ok(LogicalPlan::Aggregate {
                    grouping: group_by,
                    aggregates: output,
                    input,
                })
            }
            other => Ok(other),
        })
    }
}

fn p_ready(
    group_by: &[Expr],
    pivot_column: &Expr,
    aggregates: &[Expr],
    input: &LogicalPlan,
) -> bool {
    input.resolved()
        && pivot_column.resolved()
        && group_by.iter().all(|e| e.resolved())
        && aggregates.iter().all(|e| e.resolved())
}

/// Make every aggregate argument see NULL for rows of other pivot values.
/// First/Last switch to ignore-nulls mode so the masked rows do not win.
fn filter_by_pivot_value(aggregate: Expr, pivot_column: &Expr, value: &Expr) -> Result<Expr> {
    aggregate.transform_down(&mut |e| match e {
        Expr::AggregateFunction {
            kind: kind @ (AggregateKind::First | AggregateKind::Last),
            args,
            ..
        } => Ok(Expr::AggregateFunction {
            kind,
            args: args
                .into_iter()
                .map(|a| masked(a, pivot_column, value))
                .collect::<Result<_>>()?,
            ignore_nulls: true,
        }),
        Expr::AggregateFunction {
            kind,
            args,
            ignore_nulls,
        } => Ok(Expr::AggregateFunction {
            kind,
            args: args
                .into_iter()
                .map(|a| masked(a, pivot_column, value))
                .collect::<Result<_>>()?,
            ignore_nulls,
        }),
        other => Ok(other),
    })
}

fn masked(arg: Expr, pivot_column: &Expr, value: &Expr) -> Result<Expr> {
    let null = Expr::null(arg.data_type()?);
    Ok(Expr::if_else(
        Expr::eq(pivot_column.clone(), value.clone()),
        arg,
        null,
    ))
}

fn freshen_result_ids(e: Expr) -> Result<Expr> {
    e.transform_up(&mut |e| match e {
        Expr::AggregateExpression {
            func,
            mode,
            distinct,
            ..
        } => Ok(Expr::AggregateExpression {
            func,
            mode,
            distinct,
            result_id: ExprId::fresh(),
        }),
        other => Ok(other),
    })
}
