use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::{AttributeRef, Expr, SortOrder, WindowFrameSpec, WindowSpec};
use crate::logical_plan::LogicalPlan;

/// Move window expressions out of projection and aggregation lists into
/// dedicated `Window` operators, one per `(partition, order)` pair, lifting
/// the plain computations they depend on into the operator below.
pub struct ExtractWindowExpressions;

impl AnalyzerRule for ExtractWindowExpressions {
    fn name(&self) -> &str {
        "extract-window-expressions"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_down(&mut |p| match p {
            LogicalPlan::Filter {
                ref condition, ..
            } if has_window(condition) => Err(FlintError::analysis(
                "It is not allowed to use window functions inside WHERE and HAVING clauses",
            )),
            // HAVING over a windowed aggregate: the filter must run between
            // the aggregation and the window computation.
            LogicalPlan::Filter { condition, input }
                if matches!(&*input, LogicalPlan::Aggregate { input: agg_input, aggregates, .. }
                    if agg_input.resolved() && aggregates.iter().any(has_window)) =>
            {
                let LogicalPlan::Aggregate {
                    grouping,
                    aggregates,
                    input: agg_input,
                } = *input
                else {
                    unreachable!()
                };
                if !exprs_resolved(&grouping) || !exprs_resolved(&aggregates) {
                    return Ok(LogicalPlan::Filter {
                        condition,
                        input: Box::new(LogicalPlan::Aggregate {
                            grouping,
                            aggregates,
                            input: agg_input,
                        }),
                    });
                }
                let extracted = extract(aggregates)?;
                let below = LogicalPlan::Aggregate {
                    grouping,
                    aggregates: extracted.below_list,
                    input: agg_input,
                };
                let filtered = LogicalPlan::filter(condition, below);
                let windowed = add_window(extracted.windowed, filtered)?;
                Ok(LogicalPlan::project_attrs(&extracted.final_attrs, windowed))
            }
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            } if input.resolved()
                && aggregates.iter().any(has_window)
                && exprs_resolved(&grouping)
                && exprs_resolved(&aggregates) =>
            {
                let extracted = extract(aggregates)?;
                let below = LogicalPlan::Aggregate {
                    grouping,
                    aggregates: extracted.below_list,
                    input,
                };
                let windowed = add_window(extracted.windowed, below)?;
                Ok(LogicalPlan::project_attrs(&extracted.final_attrs, windowed))
            }
            LogicalPlan::Project { list, input }
                if input.resolved() && list.iter().any(has_window) && exprs_resolved(&list) =>
            {
                let extracted = extract(list)?;
                let below = LogicalPlan::Project {
                    list: extracted.below_list,
                    input,
                };
                let windowed = add_window(extracted.windowed, below)?;
                Ok(LogicalPlan::project_attrs(&extracted.final_attrs, windowed))
            }
            other => Ok(other),
        })
    }
}

fn has_window(e: &Expr) -> bool {
    e.exists(&mut |x| matches!(x, Expr::WindowExpression { .. }))
}

fn exprs_resolved(list: &[Expr]) -> bool {
    list.iter().all(|e| e.resolved())
}

struct Extracted {
    /// Named window-bearing expressions, inner computations replaced by
    /// references into `below_list`.
    windowed: Vec<Expr>,
    /// Regular items plus lifted dependencies, for the operator below the
    /// window stack.
    below_list: Vec<Expr>,
    /// The original output, in order, for the stripping projection on top.
    final_attrs: Vec<AttributeRef>,
}

fn extract(list: Vec<Expr>) -> Result<Extracted> {
    // Bare window items need a name before anything can reference them.
    let mut named: Vec<(bool, Expr)> = Vec::with_capacity(list.len());
    for item in list {
        let windowed = has_window(&item);
        let item = if windowed && !matches!(item, Expr::Alias { .. }) {
            let name = format!("_we{}", named.iter().filter(|(w, _)| *w).count());
            item.alias(name)
        } else {
            item
        };
        named.push((windowed, item));
    }

    let final_attrs = named
        .iter()
        .map(|(_, e)| {
            e.to_attribute().ok_or_else(|| {
                FlintError::Internal(format!("unnamed item in window extraction: {}", format_expr(e)))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut regular: Vec<Expr> = Vec::new();
    let mut lifted: Vec<Expr> = Vec::new();
    let mut seen_window_aggs: Vec<Expr> = Vec::new();
    let mut windowed_out: Vec<Expr> = Vec::new();
    for (is_windowed, item) in named {
        if !is_windowed {
            regular.push(item);
            continue;
        }
        let rewritten = item.transform_down(&mut |e| match e {
            Expr::WindowExpression { function, spec } => {
                let spec = WindowSpec {
                    partition_by: spec
                        .partition_by
                        .into_iter()
                        .map(|e| lift_expr(e, &mut lifted))
                        .collect::<Result<_>>()?,
                    order_by: spec
                        .order_by
                        .into_iter()
                        .map(|s| {
                            let expr = lift_expr(s.expr.clone(), &mut lifted)?;
                            Ok(s.with_expr(expr))
                        })
                        .collect::<Result<Vec<SortOrder>>>()?,
                    frame: spec.frame,
                };
                // A windowed aggregate is evaluated by the Window operator;
                // only its inputs are lifted.
                let function = match *function {
                    Expr::AggregateExpression {
                        func,
                        mode,
                        distinct,
                        result_id,
                    } => {
                        let func = match *func {
                            Expr::AggregateFunction {
                                kind,
                                args,
                                ignore_nulls,
                            } => Expr::AggregateFunction {
                                kind,
                                args: args
                                    .into_iter()
                                    .map(|a| lift_expr(a, &mut lifted))
                                    .collect::<Result<_>>()?,
                                ignore_nulls,
                            },
                            other => other,
                        };
                        let agg = Expr::AggregateExpression {
                            func: Box::new(func),
                            mode,
                            distinct,
                            result_id,
                        };
                        seen_window_aggs.push(agg.clone());
                        agg
                    }
                    other => other,
                };
                Ok(Expr::WindowExpression {
                    function: Box::new(function),
                    spec,
                })
            }
            Expr::WindowFunction { kind, args } => Ok(Expr::WindowFunction {
                kind,
                args: args
                    .into_iter()
                    .map(|a| lift_expr(a, &mut lifted))
                    .collect::<Result<_>>()?,
            }),
            agg @ Expr::AggregateExpression { .. } if !seen_window_aggs.contains(&agg) => {
                lift_expr(agg, &mut lifted)
            }
            attr @ Expr::Attribute(_) => lift_expr(attr, &mut lifted),
            other => Ok(other),
        })?;
        windowed_out.push(rewritten);
    }

    let below_list = merge_below(regular, lifted);
    Ok(Extracted {
        windowed: windowed_out,
        below_list,
        final_attrs,
    })
}

/// Replace a computation by a reference to a named column in the operator
/// below. Named expressions are forwarded as-is, foldables stay inline, and
/// anything else gets a generated `_w<i>` alias.
fn lift_expr(e: Expr, lifted: &mut Vec<Expr>) -> Result<Expr> {
    match e {
        Expr::Attribute(ref a) => {
            if !lifted
                .iter()
                .any(|x| x.to_attribute().map(|t| t.id == a.id).unwrap_or(false))
            {
                lifted.push(e.clone());
            }
            Ok(e)
        }
        Expr::Alias { .. } => {
            let attr = e
                .to_attribute()
                .ok_or_else(|| FlintError::Internal("untyped alias in window extraction".into()))?;
            if !lifted
                .iter()
                .any(|x| x.to_attribute().map(|t| t.id == attr.id).unwrap_or(false))
            {
                lifted.push(e);
            }
            Ok(Expr::Attribute(attr))
        }
        e if e.foldable() => Ok(e),
        other => {
            let alias = other.alias(format!("_w{}", lifted.len()));
            let attr = alias
                .to_attribute()
                .ok_or_else(|| FlintError::Internal("untyped lifted expression".into()))?;
            lifted.push(alias);
            Ok(Expr::Attribute(attr))
        }
    }
}

fn merge_below(mut regular: Vec<Expr>, lifted: Vec<Expr>) -> Vec<Expr> {
    for item in lifted {
        let id = item.to_attribute().map(|a| a.id);
        let duplicate = id
            .map(|id| {
                regular
                    .iter()
                    .any(|r| r.to_attribute().map(|a| a.id == id).unwrap_or(false))
            })
            .unwrap_or(false);
        if !duplicate {
            regular.push(item);
        }
    }
    regular
}

/// Stack one `Window` operator per distinct `(partition, order)` pair.
fn add_window(windowed: Vec<Expr>, child: LogicalPlan) -> Result<LogicalPlan> {
    type SpecKey = (Vec<Expr>, Vec<SortOrder>);
    let mut groups: Vec<(SpecKey, Vec<Expr>)> = Vec::new();
    for item in windowed {
        let mut specs: Vec<SpecKey> = Vec::new();
        item.visit(&mut |e| {
            if let Expr::WindowExpression { spec, .. } = e {
                let key = (spec.partition_by.clone(), spec.order_by.clone());
                if !specs.contains(&key) {
                    specs.push(key);
                }
            }
        });
        if specs.len() != 1 {
            return Err(FlintError::analysis(format!(
                "{} has multiple Window Specifications; a single expression must use one window",
                format_expr(&item)
            )));
        }
        let key = specs.pop().expect("one spec");
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, exprs)) => exprs.push(item),
            None => groups.push((key, vec![item])),
        }
    }

    let mut current = child;
    for ((partition_by, order_by), window_exprs) in groups {
        current = LogicalPlan::Window {
            window_exprs,
            partition_by,
            order_by,
            input: Box::new(current),
        };
    }
    Ok(current)
}

/// Validate mandated frames and fill unspecified ones.
pub struct ResolveWindowFrame;

impl AnalyzerRule for ResolveWindowFrame {
    fn name(&self) -> &str {
        "resolve-window-frame"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_expressions_up(&mut |e| match e {
            Expr::WindowExpression { function, spec } => {
                let required = match function.as_ref() {
                    Expr::WindowFunction { kind, args } => kind.required_frame(args),
                    _ => None,
                };
                let frame = match (required, spec.frame) {
                    (Some(required), Some(given)) if given != required => {
                        return Err(FlintError::analysis(format!(
                            "Window Frame {given:?} must match the required frame {required:?}"
                        )));
                    }
                    (Some(required), _) => Some(required),
                    (None, Some(given)) => Some(given),
                    (None, None) => {
                        Some(WindowFrameSpec::default_frame(!spec.order_by.is_empty()))
                    }
                };
                Ok(Expr::WindowExpression {
                    function,
                    spec: WindowSpec { frame, ..spec },
                })
            }
            other => Ok(other),
        })
    }
}

/// Rank-like functions need an ORDER BY; the order keys become their
/// operands.
pub struct ResolveWindowOrder;

impl AnalyzerRule for ResolveWindowOrder {
    fn name(&self) -> &str {
        "resolve-window-order"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_expressions_up(&mut |e| match e {
            Expr::WindowExpression { function, spec } => {
                if let Expr::WindowFunction { kind, args } = function.as_ref() {
                    if kind.requires_order() && spec.order_by.is_empty() {
                        return Err(FlintError::analysis(format!(
                            "Window function {}() requires window to be ordered, please add \
                             ORDER BY clause",
                            kind.display_name()
                        )));
                    }
                    if kind.rank_like() && args.is_empty() {
                        let injected = Expr::WindowFunction {
                            kind: *kind,
                            args: spec.order_by.iter().map(|s| s.expr.clone()).collect(),
                        };
                        return Ok(Expr::WindowExpression {
                            function: Box::new(injected),
                            spec,
                        });
                    }
                }
                Ok(Expr::WindowExpression { function, spec })
            }
            other => Ok(other),
        })
    }
}
