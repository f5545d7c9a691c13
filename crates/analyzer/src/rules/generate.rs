use arrow_schema::DataType;
use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::{AttributeRef, Expr, GeneratorKind};
use crate::logical_plan::LogicalPlan;

/// Relocate table-generating functions out of projection lists into a
/// dedicated `Generate` operator below the projection.
pub struct ResolveGenerate;

impl AnalyzerRule for ResolveGenerate {
    fn name(&self) -> &str {
        "resolve-generate"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| match p {
            LogicalPlan::Project { list, input }
                if list.iter().filter(|e| is_generator_item(e)).count() > 0 =>
            {
                let generators: Vec<&Expr> =
                    list.iter().filter(|e| is_generator_item(e)).collect();
                if generators.len() > 1 {
                    return Err(FlintError::analysis(format!(
                        "Only one generator allowed per select clause but found {}: {}",
                        generators.len(),
                        generators
                            .iter()
                            .map(|g| format_expr(g))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
                let generator_item = generators[0].clone();
                let (generator, names) = unwrap_generator(&generator_item);
                if !generator.resolved() {
                    return Ok(LogicalPlan::Project { list, input });
                }

                let output = generator_output(&generator, &names)?;
                let join = list.len() > 1;
                let generate = LogicalPlan::Generate {
                    generator,
                    join,
                    outer: false,
                    qualifier: None,
                    generator_output: output.clone(),
                    input,
                };
                // Splice the generated columns into the generator's slot.
                let mut new_list: Vec<Expr> = Vec::with_capacity(list.len() + output.len());
                for item in list {
                    if is_generator_item(&item) {
                        new_list.extend(output.iter().cloned().map(Expr::Attribute));
                    } else {
                        new_list.push(item);
                    }
                }
                Ok(LogicalPlan::Project {
                    list: new_list,
                    input: Box::new(generate),
                })
            }
            // A Generate whose outputs were not named yet (e.g. built by a
            // lateral view without aliases) gets the generator's own names.
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                qualifier,
                generator_output,
                input,
            } if generator_output.is_empty()
                && generator.resolved()
                && matches!(generator, Expr::Generator { .. }) =>
            {
                let generator_output = generator_output_schema(&generator)?
                    .into_iter()
                    .map(|(name, dt, nullable)| AttributeRef::new(name, dt, nullable))
                    .collect();
                Ok(LogicalPlan::Generate {
                    generator,
                    join,
                    outer,
                    qualifier,
                    generator_output,
                    input,
                })
            }
            other => Ok(other),
        })
    }
}

fn is_generator_item(e: &Expr) -> bool {
    match e {
        Expr::Generator { .. } => true,
        Expr::Alias { child, .. }
        | Expr::MultiAlias { child, .. }
        | Expr::UnresolvedAlias { child } => matches!(child.as_ref(), Expr::Generator { .. }),
        _ => false,
    }
}

fn unwrap_generator(e: &Expr) -> (Expr, Vec<String>) {
    match e {
        Expr::Alias { child, name, .. } => ((**child).clone(), vec![name.clone()]),
        Expr::MultiAlias { child, names } => ((**child).clone(), names.clone()),
        Expr::UnresolvedAlias { child } => ((**child).clone(), vec![]),
        other => (other.clone(), vec![]),
    }
}

fn generator_output(generator: &Expr, names: &[String]) -> Result<Vec<AttributeRef>> {
    let schema = generator_output_schema(generator)?;
    if !names.is_empty() && names.len() != schema.len() {
        return Err(FlintError::analysis(format!(
            "The number of aliases supplied in the AS clause does not match the number \
             of columns output by the UDTF expected {} aliases but got {}",
            schema.len(),
            names.join(", ")
        )));
    }
    Ok(schema
        .into_iter()
        .enumerate()
        .map(|(i, (default_name, dt, nullable))| {
            let name = names.get(i).cloned().unwrap_or(default_name);
            AttributeRef::new(name, dt, nullable)
        })
        .collect())
}

/// Field layout produced by one generator invocation, derived from the
/// argument type.
fn generator_output_schema(generator: &Expr) -> Result<Vec<(String, DataType, bool)>> {
    let Expr::Generator { kind, args } = generator else {
        return Err(FlintError::Internal(format!(
            "generator_output_schema on non-generator {}",
            format_expr(generator)
        )));
    };
    let arg_type = args
        .first()
        .ok_or_else(|| FlintError::Internal("generator without arguments".to_string()))?
        .data_type()?;
    let mut fields = match arg_type {
        DataType::List(field) | DataType::LargeList(field) => {
            vec![("col".to_string(), field.data_type().clone(), true)]
        }
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) => vec![
                ("key".to_string(), kv[0].data_type().clone(), false),
                ("value".to_string(), kv[1].data_type().clone(), true),
            ],
            other => {
                return Err(FlintError::Internal(format!(
                    "malformed map entry type {other:?}"
                )))
            }
        },
        other => {
            return Err(FlintError::analysis(format!(
                "Cannot explode {other:?}: input to {} must be an array or map",
                kind.display_name()
            )))
        }
    };
    if matches!(kind, GeneratorKind::PosExplode) {
        fields.insert(0, ("pos".to_string(), DataType::Int64, false));
    }
    Ok(fields)
}
