use flint_common::Result;

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::expr::Expr;
use crate::logical_plan::LogicalPlan;

/// Give non-deterministic expressions a single evaluation site: any unary
/// operator other than Project/Filter that forwards its child's schema has
/// its non-deterministic leaves pulled into a projection below it.
pub struct PullOutNondeterministic;

impl AnalyzerRule for PullOutNondeterministic {
    fn name(&self) -> &str {
        "pull-out-nondeterministic"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.resolved() {
                return Ok(p);
            }
            match p {
                keep @ (LogicalPlan::Project { .. } | LogicalPlan::Filter { .. }) => Ok(keep),
                LogicalPlan::Aggregate {
                    grouping,
                    aggregates,
                    input,
                } if grouping.iter().any(|g| !g.deterministic()) => {
                    let pulled = nondeterministic_leaves(grouping.iter());
                    let mut project_list: Vec<Expr> =
                        input.output().into_iter().map(Expr::Attribute).collect();
                    project_list.extend(pulled.iter().map(|(_, alias)| alias.clone()));
                    let new_input = LogicalPlan::Project {
                        list: project_list,
                        input,
                    };
                    let rewritten = LogicalPlan::Aggregate {
                        grouping,
                        aggregates,
                        input: Box::new(new_input),
                    }
                    .map_expressions(&mut |e| Ok(substitute(e, &pulled)))?;
                    Ok(rewritten)
                }
                p if p.children().len() == 1
                    && p.output() == p.children()[0].output()
                    && p.expressions().iter().any(|e| !e.deterministic()) =>
                {
                    let pulled = nondeterministic_leaves(p.expressions().into_iter());
                    let child = p.children()[0].clone();
                    let original_output = p.output();
                    let mut project_list: Vec<Expr> =
                        child.output().into_iter().map(Expr::Attribute).collect();
                    project_list.extend(pulled.iter().map(|(_, alias)| alias.clone()));
                    let new_child = LogicalPlan::Project {
                        list: project_list,
                        input: Box::new(child),
                    };
                    let rewritten = p
                        .map_expressions(&mut |e| Ok(substitute(e, &pulled)))?
                        .with_new_child(new_child)?;
                    Ok(LogicalPlan::project_attrs(&original_output, rewritten))
                }
                other => Ok(other),
            }
        })
    }
}

/// Distinct non-deterministic leaf expressions paired with generated
/// aliases.
fn nondeterministic_leaves<'a>(
    exprs: impl Iterator<Item = &'a Expr>,
) -> Vec<(Expr, Expr)> {
    let mut out: Vec<(Expr, Expr)> = Vec::new();
    for e in exprs {
        e.visit(&mut |x| {
            let leaf = matches!(x, Expr::Rand { .. })
                || matches!(
                    x,
                    Expr::ScalarUdf {
                        deterministic: false,
                        ..
                    }
                );
            if leaf && !out.iter().any(|(k, _)| k == x) {
                out.push((x.clone(), x.clone().alias("_nondeterministic")));
            }
        });
    }
    out
}

fn substitute(e: Expr, pulled: &[(Expr, Expr)]) -> Expr {
    e.transform_up(&mut |x| {
        if let Some((_, alias)) = pulled.iter().find(|(k, _)| *k == x) {
            if let Some(attr) = alias.to_attribute() {
                return Ok(Expr::Attribute(attr));
            }
        }
        Ok(x)
    })
    .expect("substitution is infallible")
}

/// Trim alias wrappers everywhere except the canonical naming positions:
/// top level of Project lists, Aggregate aggregate lists, and Window
/// expression lists. Aliases directly under a struct construction survive
/// because they pick the struct's field names.
pub struct CleanupAliases;

impl AnalyzerRule for CleanupAliases {
    fn name(&self) -> &str {
        "cleanup-aliases"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Project { list, input } => Ok(LogicalPlan::Project {
                list: list.into_iter().map(trim_non_top_level).collect(),
                input,
            }),
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            } => Ok(LogicalPlan::Aggregate {
                grouping: grouping.into_iter().map(trim_aliases).collect(),
                aggregates: aggregates.into_iter().map(trim_non_top_level).collect(),
                input,
            }),
            LogicalPlan::Window {
                window_exprs,
                partition_by,
                order_by,
                input,
            } => Ok(LogicalPlan::Window {
                window_exprs: window_exprs.into_iter().map(trim_non_top_level).collect(),
                partition_by: partition_by.into_iter().map(trim_aliases).collect(),
                order_by: order_by
                    .into_iter()
                    .map(|s| {
                        let expr = trim_aliases(s.expr.clone());
                        s.with_expr(expr)
                    })
                    .collect(),
                input,
            }),
            other => other.map_expressions(&mut |e| Ok(trim_aliases(e))),
        })
    }
}

fn trim_aliases(e: Expr) -> Expr {
    match e {
        Expr::Alias { child, .. } => trim_aliases(*child),
        Expr::CreateStruct { children } => Expr::CreateStruct {
            children: children.into_iter().map(trim_non_top_level).collect(),
        },
        other => other
            .map_children(&mut |c| Ok(trim_aliases(c)))
            .expect("alias trimming is infallible"),
    }
}

fn trim_non_top_level(e: Expr) -> Expr {
    match e {
        Expr::Alias { child, name, id } => Expr::Alias {
            child: Box::new(trim_aliases(*child)),
            name,
            id,
        },
        other => trim_aliases(other),
    }
}

/// Erase `SubqueryAlias` nodes; attribute resolution has already consumed
/// their qualifier information.
pub struct EliminateSubqueryAliases;

impl AnalyzerRule for EliminateSubqueryAliases {
    fn name(&self) -> &str {
        "eliminate-subquery-aliases"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::SubqueryAlias { input, .. } => Ok(*input),
            other => Ok(other),
        })
    }
}
