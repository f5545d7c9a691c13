use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::logical_plan::LogicalPlan;

/// Bind `UnresolvedRelation` nodes against the catalog.
///
/// Insert targets are looked up with any enclosing `SubqueryAlias` stripped.
/// A db-qualified reference that misses the catalog is left untouched when
/// `run_sql_on_file` is on, so a later file-based resolver can claim it.
pub struct ResolveRelations;

impl AnalyzerRule for ResolveRelations {
    fn name(&self) -> &str {
        "resolve-relations"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::InsertIntoTable {
                table,
                input,
                overwrite,
            } => {
                let table = match *table {
                    LogicalPlan::UnresolvedRelation { table: id, .. } => {
                        Box::new(strip_subquery_alias(lookup(ctx, &id)?))
                    }
                    already_bound => Box::new(already_bound),
                };
                Ok(LogicalPlan::InsertIntoTable {
                    table,
                    input,
                    overwrite,
                })
            }
            LogicalPlan::UnresolvedRelation { table, alias } => {
                if let Some(db) = &table.database {
                    let unresolvable_here = !ctx.catalog.database_exists(db)
                        || !ctx.catalog.table_exists(&table);
                    if ctx.config.run_sql_on_file && unresolvable_here {
                        return Ok(LogicalPlan::UnresolvedRelation { table, alias });
                    }
                }
                let relation = lookup(ctx, &table)?;
                Ok(match alias {
                    Some(a) => LogicalPlan::SubqueryAlias {
                        alias: a,
                        input: Box::new(relation),
                    },
                    None => relation,
                })
            }
            other => Ok(other),
        })
    }
}

fn lookup(ctx: &AnalyzerContext<'_>, table: &crate::catalog::TableId) -> Result<LogicalPlan> {
    match ctx.catalog.lookup_relation(table) {
        Ok(plan) => Ok(plan),
        Err(FlintError::NoSuchTable(name)) => Err(FlintError::analysis(format!(
            "Table or view not found: {name}"
        ))),
        Err(e) => Err(e),
    }
}

fn strip_subquery_alias(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::SubqueryAlias { input, .. } => strip_subquery_alias(*input),
        other => other,
    }
}
