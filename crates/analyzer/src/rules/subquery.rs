use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::{AttributeRef, Expr};
use crate::logical_plan::LogicalPlan;
use crate::resolver::resolve_attribute;

/// Resolve subquery expressions, binding correlated references against the
/// enclosing operator's child.
///
/// A correlated reference that collides with a column the subquery can see
/// itself is renamed through a fresh alias; the aliases are materialized by
/// an inner projection under the enclosing operator and stripped again by an
/// outer one.
pub struct ResolveSubquery;

impl AnalyzerRule for ResolveSubquery {
    fn name(&self) -> &str {
        "resolve-subquery"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.children_resolved() || p.children().len() != 1 {
                return Ok(p);
            }
            let has_pending_subquery = p.expressions().iter().any(|e| {
                e.exists(&mut |x| match x {
                    Expr::ScalarSubquery { plan } | Expr::Exists { plan } => !plan.resolved(),
                    Expr::InSubquery { plan, .. } => !plan.resolved(),
                    _ => false,
                })
            });
            if !has_pending_subquery {
                return Ok(p);
            }

            let outer = p.children()[0].clone();
            let mut aliases: Vec<Expr> = Vec::new();
            let new_p = p.map_expressions(&mut |e| {
                e.transform_up(&mut |e| match e {
                    Expr::ScalarSubquery { plan } if !plan.resolved() => Ok(Expr::ScalarSubquery {
                        plan: Box::new(resolve_sub(*plan, &outer, ctx, &mut aliases)?),
                    }),
                    Expr::Exists { plan } if !plan.resolved() => Ok(Expr::Exists {
                        plan: Box::new(resolve_sub(*plan, &outer, ctx, &mut aliases)?),
                    }),
                    Expr::InSubquery { value, plan } if !plan.resolved() => {
                        Ok(Expr::InSubquery {
                            value,
                            plan: Box::new(resolve_sub(*plan, &outer, ctx, &mut aliases)?),
                        })
                    }
                    other => Ok(other),
                })
            })?;

            if aliases.is_empty() {
                return Ok(new_p);
            }
            // Materialize the renamed outer columns below the operator and
            // strip them above it.
            let original_output = outer.output();
            let mut inner_list: Vec<Expr> = original_output
                .iter()
                .cloned()
                .map(Expr::Attribute)
                .collect();
            inner_list.append(&mut aliases);
            let inner = LogicalPlan::project(inner_list, outer);
            let rebuilt = new_p.with_new_child(inner)?;
            Ok(LogicalPlan::project_attrs(&original_output, rebuilt))
        })
    }
}

/// Alternate between full analysis of the sub-plan and outer-reference
/// binding until the sub-plan resolves or stops changing.
fn resolve_sub(
    sub: LogicalPlan,
    outer: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
    aliases: &mut Vec<Expr>,
) -> Result<LogicalPlan> {
    let mut current = sub;
    for _ in 0..ctx.config.max_iterations {
        let analyzed = match ctx.try_execute(current.clone())? {
            Some(p) => p,
            None => current.clone(),
        };
        if analyzed.resolved() {
            return Ok(analyzed);
        }
        let mut changed = false;
        let with_outer = bind_outer_references(analyzed, outer, ctx, aliases, &mut changed)?;
        if !changed {
            return Ok(with_outer);
        }
        current = with_outer;
    }
    Ok(current)
}

/// Walk the unresolved frontier of the sub-plan and try each unresolved
/// attribute against the outer scope.
fn bind_outer_references(
    plan: LogicalPlan,
    outer: &LogicalPlan,
    ctx: &AnalyzerContext<'_>,
    aliases: &mut Vec<Expr>,
    changed: &mut bool,
) -> Result<LogicalPlan> {
    let outer_attrs = outer.output();
    plan.transform_down(&mut |p| {
        if !p.children_resolved() || p.resolved() {
            return Ok(p);
        }
        let inner_inputs = p.input_set();
        p.map_expressions(&mut |e| {
            e.transform_up(&mut |e| match e {
                Expr::UnresolvedAttribute { name_parts } => {
                    match resolve_attribute(&name_parts, &outer_attrs, &ctx.resolver) {
                        Ok(Some(Expr::Attribute(outer_attr))) => {
                            *changed = true;
                            if inner_inputs.contains_id(outer_attr.id) {
                                Ok(Expr::Attribute(rename_outer(outer_attr, aliases)))
                            } else {
                                Ok(Expr::Attribute(outer_attr))
                            }
                        }
                        Ok(Some(other)) => {
                            *changed = true;
                            Ok(other)
                        }
                        // Ambiguity against the outer scope is not definitive
                        // here; the reference may still bind elsewhere.
                        Ok(None) | Err(FlintError::Analysis(_)) => {
                            Ok(Expr::UnresolvedAttribute { name_parts })
                        }
                        Err(e) => Err(e),
                    }
                }
                other => Ok(other),
            })
        })
    })
}

/// Reuse an existing rename of this outer column, or mint one.
fn rename_outer(outer_attr: AttributeRef, aliases: &mut Vec<Expr>) -> AttributeRef {
    for alias in aliases.iter() {
        if let Expr::Alias { child, .. } = alias {
            if matches!(child.as_ref(), Expr::Attribute(a) if a.id == outer_attr.id) {
                if let Some(attr) = alias.to_attribute() {
                    return attr;
                }
            }
        }
    }
    let name = format_expr(&Expr::Attribute(outer_attr.clone()));
    let alias = Expr::Attribute(outer_attr).alias(name);
    let attr = alias
        .to_attribute()
        .expect("alias over attribute is always typed");
    aliases.push(alias);
    attr
}
