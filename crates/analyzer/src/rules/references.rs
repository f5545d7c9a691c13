use flint_common::{ExprId, FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::{AttributeRef, AttributeSet, Expr, LiteralValue};
use crate::logical_plan::LogicalPlan;
use crate::resolver::{extract_value, resolve_attribute, NameResolver};

/// Bind unresolved attributes against child outputs, expand stars, type
/// extraction expressions, and de-duplicate attribute ids between the sides
/// of binary operators.
///
/// Attributes that cannot be bound yet are left in place for a later pass;
/// ambiguity and star misuse are definitive and fail immediately.
pub struct ResolveReferences;

impl AnalyzerRule for ResolveReferences {
    fn name(&self) -> &str {
        "resolve-references"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.children_resolved() {
                return Ok(p);
            }
            match p {
                LogicalPlan::Project { list, input } if contains_star(&list) => {
                    let list = expand_star_list(list, &input, ctx)?;
                    Ok(LogicalPlan::Project { list, input })
                }
                LogicalPlan::Aggregate {
                    grouping,
                    aggregates,
                    input,
                } if contains_star(&aggregates) => {
                    if ctx.config.group_by_ordinal && grouping.iter().any(is_integer_literal) {
                        return Err(FlintError::analysis(
                            "Star (*) is not allowed in select list when GROUP BY ordinal position is used",
                        ));
                    }
                    let aggregates = expand_star_list(aggregates, &input, ctx)?;
                    Ok(LogicalPlan::Aggregate {
                        grouping,
                        aggregates,
                        input,
                    })
                }
                LogicalPlan::ScriptTransformation {
                    input_exprs,
                    script,
                    output,
                    input,
                } if contains_star(&input_exprs) => {
                    let input_exprs = expand_star_list(input_exprs, &input, ctx)?;
                    Ok(LogicalPlan::ScriptTransformation {
                        input_exprs,
                        script,
                        output,
                        input,
                    })
                }
                LogicalPlan::Generate { ref generator, .. }
                    if generator.exists(&mut |e| matches!(e, Expr::Star { .. })) =>
                {
                    Err(FlintError::analysis(
                        "Invalid usage of '*' in explode/json_tuple/UDTF",
                    ))
                }
                LogicalPlan::Join {
                    left,
                    right,
                    join_type,
                    condition,
                } => {
                    if left.output_set().intersect(&right.output_set()).is_empty() {
                        resolve_node(
                            LogicalPlan::Join {
                                left,
                                right,
                                join_type,
                                condition,
                            },
                            &ctx.resolver,
                        )
                    } else {
                        let right = dedup_right(&left, *right);
                        Ok(LogicalPlan::Join {
                            left,
                            right: Box::new(right),
                            join_type,
                            condition,
                        })
                    }
                }
                LogicalPlan::Intersect { left, right } => {
                    if left.output_set().intersect(&right.output_set()).is_empty() {
                        Ok(LogicalPlan::Intersect { left, right })
                    } else {
                        let right = dedup_right(&left, *right);
                        Ok(LogicalPlan::Intersect {
                            left,
                            right: Box::new(right),
                        })
                    }
                }
                other => resolve_node(other, &ctx.resolver),
            }
        })
    }
}

fn is_integer_literal(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Literal {
            value: LiteralValue::Int64(_),
            ..
        }
    )
}

fn is_star(e: &Expr) -> bool {
    matches!(e, Expr::Star { .. })
}

fn contains_star(list: &[Expr]) -> bool {
    list.iter().any(|e| e.exists(&mut is_star))
}

/// Bind this node's own expressions bottom-up against its children's output.
pub(crate) fn resolve_node(plan: LogicalPlan, resolver: &NameResolver) -> Result<LogicalPlan> {
    let input_attrs: Vec<AttributeRef> = plan
        .children()
        .iter()
        .flat_map(|c| c.output())
        .collect();
    plan.map_expressions(&mut |e| resolve_expression(e, &input_attrs, resolver))
}

/// Bottom-up attribute and extraction binding within one expression.
pub(crate) fn resolve_expression(
    e: Expr,
    attrs: &[AttributeRef],
    resolver: &NameResolver,
) -> Result<Expr> {
    e.transform_up(&mut |e| match e {
        Expr::UnresolvedAttribute { name_parts } => {
            match resolve_attribute(&name_parts, attrs, resolver)? {
                Some(resolved) => Ok(resolved),
                None => Ok(Expr::UnresolvedAttribute { name_parts }),
            }
        }
        Expr::UnresolvedExtractValue { child, field } if child.resolved() => {
            extract_value(*child, *field, resolver)
        }
        other => Ok(other),
    })
}

// ---- star expansion --------------------------------------------------------

fn expand_star_list(
    list: Vec<Expr>,
    input: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<Vec<Expr>> {
    let mut out = Vec::with_capacity(list.len());
    for item in list {
        match item {
            Expr::Star { qualifier } => {
                out.extend(
                    expand_star(&qualifier, input, ctx)?
                        .into_iter()
                        .map(Expr::Attribute),
                );
            }
            Expr::UnresolvedAlias { child } if is_star(&child) => {
                let Expr::Star { qualifier } = *child else {
                    unreachable!()
                };
                out.extend(
                    expand_star(&qualifier, input, ctx)?
                        .into_iter()
                        .map(Expr::Attribute),
                );
            }
            other => out.push(expand_star_in_expr(other, input, ctx)?),
        }
    }
    Ok(out)
}

fn expand_star(
    qualifier: &Option<String>,
    input: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<Vec<AttributeRef>> {
    let attrs = input.output();
    match qualifier {
        None => Ok(attrs),
        Some(q) => {
            let filtered: Vec<AttributeRef> = attrs
                .into_iter()
                .filter(|a| {
                    a.qualifier
                        .as_deref()
                        .map(|aq| ctx.resolver.matches(aq, q))
                        .unwrap_or(false)
                })
                .collect();
            if filtered.is_empty() {
                Err(FlintError::analysis(format!(
                    "cannot resolve '{q}.*' given input columns {}",
                    input
                        .output()
                        .iter()
                        .map(AttributeRef::qualified_name)
                        .collect::<Vec<_>>()
                        .join(", ")
                )))
            } else {
                Ok(filtered)
            }
        }
    }
}

/// Expand stars nested inside the contexts that allow them (function
/// arguments, struct/array construction); any star left after that is
/// illegal in its position.
fn expand_star_in_expr(
    e: Expr,
    input: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<Expr> {
    let expanded = e.transform_up(&mut |e| match e {
        Expr::UnresolvedFunction {
            name,
            args,
            distinct,
        } if args.iter().any(is_star) => Ok(Expr::UnresolvedFunction {
            name,
            args: splice_stars(args, input, ctx)?,
            distinct,
        }),
        Expr::CreateStruct { children } if children.iter().any(is_star) => {
            Ok(Expr::CreateStruct {
                children: splice_stars(children, input, ctx)?,
            })
        }
        Expr::CreateArray { children } if children.iter().any(is_star) => {
            Ok(Expr::CreateArray {
                children: splice_stars(children, input, ctx)?,
            })
        }
        Expr::UnresolvedGenerator { ref args, .. } | Expr::Generator { ref args, .. }
            if args.iter().any(|a| a.exists(&mut is_star)) =>
        {
            Err(FlintError::analysis(
                "Invalid usage of '*' in explode/json_tuple/UDTF",
            ))
        }
        other => Ok(other),
    })?;
    if expanded.exists(&mut is_star) {
        return Err(FlintError::analysis(format!(
            "Invalid usage of '*' in expression '{}'",
            format_expr(&expanded)
        )));
    }
    Ok(expanded)
}

fn splice_stars(
    args: Vec<Expr>,
    input: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<Vec<Expr>> {
    let mut out = Vec::with_capacity(args.len());
    for a in args {
        match a {
            Expr::Star { qualifier } => out.extend(
                expand_star(&qualifier, input, ctx)?
                    .into_iter()
                    .map(Expr::Attribute),
            ),
            other => out.push(other),
        }
    }
    Ok(out)
}

// ---- attribute-id de-duplication -------------------------------------------

type IdMap = Vec<(ExprId, AttributeRef)>;

/// Fix one id collision between `left` and `right` by re-minting ids at the
/// first (pre-order) node in `right` that produces a conflicting id, then
/// rewriting references throughout the right subtree. Remaining collisions
/// are handled by subsequent fixed-point iterations.
fn dedup_right(left: &LogicalPlan, right: LogicalPlan) -> LogicalPlan {
    let conflicts = left.output_set().intersect(&right.output_set());
    let (rewritten, mapping) = rewrite_first_conflict(right, &conflicts);
    match mapping {
        Some(map) => rewritten.rewrite_attributes(&map),
        None => rewritten,
    }
}

fn rewrite_first_conflict(
    plan: LogicalPlan,
    conflicts: &AttributeSet,
) -> (LogicalPlan, Option<IdMap>) {
    if let Some((new_plan, map)) = remint_node(&plan, conflicts) {
        return (new_plan, Some(map));
    }
    let mut mapping: Option<IdMap> = None;
    let new_plan = plan
        .map_children(&mut |c| {
            if mapping.is_some() {
                return Ok(c);
            }
            let (new_c, m) = rewrite_first_conflict(c, conflicts);
            if m.is_some() {
                mapping = m;
            }
            Ok(new_c)
        })
        .expect("conflict rewrite is infallible");
    (new_plan, mapping)
}

/// Re-mint the ids a node itself produces, when they collide. Pass-through
/// collisions are fixed deeper in the tree.
fn remint_node(plan: &LogicalPlan, conflicts: &AttributeSet) -> Option<(LogicalPlan, IdMap)> {
    match plan {
        LogicalPlan::Relation { .. } | LogicalPlan::LocalRelation { .. } => {
            let old_output = plan.output();
            if !old_output.iter().any(|a| conflicts.contains_id(a.id)) {
                return None;
            }
            let new_plan = plan.new_instance()?;
            let map = old_output
                .iter()
                .zip(new_plan.output())
                .map(|(o, n)| (o.id, n))
                .collect();
            Some((new_plan, map))
        }
        LogicalPlan::Project { list, input } => {
            let (list, map) = remint_aliases(list, conflicts)?;
            Some((
                LogicalPlan::Project {
                    list,
                    input: input.clone(),
                },
                map,
            ))
        }
        LogicalPlan::Aggregate {
            grouping,
            aggregates,
            input,
        } => {
            let (aggregates, map) = remint_aliases(aggregates, conflicts)?;
            Some((
                LogicalPlan::Aggregate {
                    grouping: grouping.clone(),
                    aggregates,
                    input: input.clone(),
                },
                map,
            ))
        }
        LogicalPlan::Window {
            window_exprs,
            partition_by,
            order_by,
            input,
        } => {
            let (window_exprs, map) = remint_aliases(window_exprs, conflicts)?;
            Some((
                LogicalPlan::Window {
                    window_exprs,
                    partition_by: partition_by.clone(),
                    order_by: order_by.clone(),
                    input: input.clone(),
                },
                map,
            ))
        }
        LogicalPlan::Generate {
            generator,
            join,
            outer,
            qualifier,
            generator_output,
            input,
        } => {
            if !generator_output.iter().any(|a| conflicts.contains_id(a.id)) {
                return None;
            }
            let new_output: Vec<AttributeRef> = generator_output
                .iter()
                .map(AttributeRef::new_instance)
                .collect();
            let map = generator_output
                .iter()
                .zip(new_output.iter())
                .map(|(o, n)| (o.id, n.clone()))
                .collect();
            Some((
                LogicalPlan::Generate {
                    generator: generator.clone(),
                    join: *join,
                    outer: *outer,
                    qualifier: qualifier.clone(),
                    generator_output: new_output,
                    input: input.clone(),
                },
                map,
            ))
        }
        _ => None,
    }
}

fn remint_aliases(list: &[Expr], conflicts: &AttributeSet) -> Option<(Vec<Expr>, IdMap)> {
    let collides = list
        .iter()
        .any(|e| matches!(e, Expr::Alias { id, .. } if conflicts.contains_id(*id)));
    if !collides {
        return None;
    }
    let mut map: IdMap = Vec::new();
    let new_list = list
        .iter()
        .cloned()
        .map(|e| match e {
            Expr::Alias { child, name, id } if conflicts.contains_id(id) => {
                let new_alias = Expr::Alias {
                    child,
                    name,
                    id: ExprId::fresh(),
                };
                if let Some(attr) = new_alias.to_attribute() {
                    map.push((id, attr));
                }
                new_alias
            }
            other => other,
        })
        .collect();
    Some((new_list, map))
}
