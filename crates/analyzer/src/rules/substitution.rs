use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::expr::Expr;
use crate::logical_plan::LogicalPlan;
use crate::resolver::NameResolver;

/// Inline common table expressions: every `UnresolvedRelation` matching a
/// CTE name is replaced by the CTE body. Lookup is by table name only, and a
/// CTE shadows any catalog table of the same name.
pub struct CteSubstitution;

impl AnalyzerRule for CteSubstitution {
    fn name(&self) -> &str {
        "cte-substitution"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver;
        plan.transform_up(&mut |p| match p {
            LogicalPlan::With { input, ctes } => {
                // Later definitions may reference earlier ones, so each body
                // is substituted against what came before it.
                let mut substituted: Vec<(String, LogicalPlan)> = Vec::with_capacity(ctes.len());
                for (name, cte) in ctes {
                    let inlined = substitute_cte(cte, &substituted, &resolver)?;
                    substituted.push((name, inlined));
                }
                substitute_cte(*input, &substituted, &resolver)
            }
            other => Ok(other),
        })
    }
}

fn substitute_cte(
    plan: LogicalPlan,
    ctes: &[(String, LogicalPlan)],
    resolver: &NameResolver,
) -> Result<LogicalPlan> {
    plan.transform_up(&mut |p| match p {
        LogicalPlan::UnresolvedRelation { table, alias } => {
            // Database component is ignored for CTE lookup.
            match ctes
                .iter()
                .rev()
                .find(|(name, _)| resolver.matches(name, &table.table))
            {
                Some((_, cte)) => Ok(match alias {
                    Some(a) => LogicalPlan::SubqueryAlias {
                        alias: a,
                        input: Box::new(cte.clone()),
                    },
                    None => cte.clone(),
                }),
                None => Ok(LogicalPlan::UnresolvedRelation { table, alias }),
            }
        }
        other => {
            // References can also hide inside subquery expressions.
            other.map_expressions(&mut |e| {
                e.transform_up(&mut |e| match e {
                    Expr::ScalarSubquery { plan } => Ok(Expr::ScalarSubquery {
                        plan: Box::new(substitute_cte(*plan, ctes, resolver)?),
                    }),
                    Expr::Exists { plan } => Ok(Expr::Exists {
                        plan: Box::new(substitute_cte(*plan, ctes, resolver)?),
                    }),
                    Expr::InSubquery { value, plan } => Ok(Expr::InSubquery {
                        value,
                        plan: Box::new(substitute_cte(*plan, ctes, resolver)?),
                    }),
                    other => Ok(other),
                })
            })
        }
    })
}

/// Replace `OVER name` references by the named window specification from the
/// enclosing `WINDOW` clause, erasing the definition node.
pub struct WindowsSubstitution;

impl AnalyzerRule for WindowsSubstitution {
    fn name(&self) -> &str {
        "window-definition-substitution"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::WithWindowDefinition { definitions, input } => {
                (*input).transform_expressions_up(&mut |e| match e {
                    Expr::UnresolvedWindowExpression { child, name } => {
                        match definitions.get(&name) {
                            Some(spec) => Ok(Expr::WindowExpression {
                                function: child,
                                spec: spec.clone(),
                            }),
                            None => Err(FlintError::analysis(format!(
                                "Window specification {name} is not defined in the WINDOW clause."
                            ))),
                        }
                    }
                    other => Ok(other),
                })
            }
            other => Ok(other),
        })
    }
}

/// `Union` of a single child is the child.
pub struct EliminateUnions;

impl AnalyzerRule for EliminateUnions {
    fn name(&self) -> &str {
        "eliminate-unions"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Union { mut inputs } if inputs.len() == 1 => Ok(inputs.remove(0)),
            other => Ok(other),
        })
    }
}
