use arrow_schema::DataType;
use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::explain::format_expr;
use crate::expr::Expr;
use crate::logical_plan::LogicalPlan;
use crate::outer_scopes::{get_outer_scope, outer_class_name};
use crate::resolver::resolve_attribute;

/// Bind the positional and named references inside a deserializer expression
/// against the operator's input attributes.
pub struct ResolveDeserializer;

impl AnalyzerRule for ResolveDeserializer {
    fn name(&self) -> &str {
        "resolve-deserializer"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver;
        plan.transform_up(&mut |p| {
            if !p.children_resolved() {
                return Ok(p);
            }
            p.map_expressions(&mut |e| {
                e.transform_up(&mut |e| match e {
                    Expr::UnresolvedDeserializer {
                        deserializer,
                        inputs,
                    } => {
                        let bound = (*deserializer).transform_up(&mut |e| match e {
                            Expr::BoundReference { ordinal, .. } => match inputs.get(ordinal) {
                                Some(attr) => Ok(Expr::Attribute(attr.clone())),
                                None => Err(FlintError::analysis(format!(
                                    "ordinal {ordinal} is out of range for {} deserializer inputs",
                                    inputs.len()
                                ))),
                            },
                            other => Ok(other),
                        })?;
                        // Anything still named resolves against the inputs,
                        // as if they were a standalone relation.
                        bound.transform_up(&mut |e| match e {
                            Expr::UnresolvedAttribute { name_parts } => {
                                match resolve_attribute(&name_parts, &inputs, &resolver)? {
                                    Some(resolved) => Ok(resolved),
                                    None => Err(FlintError::analysis(format!(
                                        "cannot resolve '{}' given input columns: [{}]",
                                        name_parts.join("."),
                                        inputs
                                            .iter()
                                            .map(|a| a.name.clone())
                                            .collect::<Vec<_>>()
                                            .join(", ")
                                    ))),
                                }
                            }
                            other => Ok(other),
                        })
                    }
                    other => Ok(other),
                })
            })
        })
    }
}

/// Wire inner-type constructions to the enclosing instance captured in the
/// process-wide outer-scope registry.
pub struct ResolveNewInstance;

impl AnalyzerRule for ResolveNewInstance {
    fn name(&self) -> &str {
        "resolve-new-instance"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_expressions_up(&mut |e| match e {
            Expr::NewInstance {
                class_name,
                args,
                needs_outer_pointer: true,
                outer_pointer: None,
                data_type,
            } => {
                let outer = outer_class_name(&class_name)
                    .filter(|outer| get_outer_scope(outer).is_some());
                match outer {
                    Some(outer) => Ok(Expr::NewInstance {
                        class_name,
                        args,
                        needs_outer_pointer: true,
                        outer_pointer: Some(outer),
                        data_type,
                    }),
                    None => Err(FlintError::analysis(format!(
                        "Unable to generate an encoder for inner type {class_name} without \
                         access to the scope that this type was defined in. Try moving this \
                         type out of its enclosing type."
                    ))),
                }
            }
            other => Ok(other),
        })
    }
}

/// Turn `UpCast` into a plain `Cast`, rejecting casts that may truncate.
pub struct ResolveUpCast;

impl AnalyzerRule for ResolveUpCast {
    fn name(&self) -> &str {
        "resolve-up-cast"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_expressions_up(&mut |e| match e {
            Expr::UpCast { expr, to_type } if expr.resolved() => {
                let from = expr.data_type()?;
                if lossy_cast(&from, &to_type) {
                    return Err(FlintError::analysis(format!(
                        "Cannot up cast {} from {from:?} to {to_type:?} as it may truncate",
                        format_expr(&expr)
                    )));
                }
                Ok(Expr::Cast { expr, to_type })
            }
            other => Ok(other),
        })
    }
}

fn numeric_precedence(dt: &DataType) -> Option<u8> {
    Some(match dt {
        DataType::Int8 => 1,
        DataType::Int16 => 2,
        DataType::Int32 => 3,
        DataType::Int64 => 4,
        DataType::Decimal128(_, _) => 5,
        DataType::Float32 => 6,
        DataType::Float64 => 7,
        _ => return None,
    })
}

fn lossy_cast(from: &DataType, to: &DataType) -> bool {
    match (from, to) {
        (DataType::Decimal128(p1, s1), DataType::Decimal128(p2, s2)) => p2 < p1 || s2 < s1,
        (DataType::Timestamp(_, _), DataType::Date32 | DataType::Date64) => true,
        (DataType::Utf8 | DataType::LargeUtf8, to) if numeric_precedence(to).is_some() => true,
        (from, to) => match (numeric_precedence(from), numeric_precedence(to)) {
            (Some(f), Some(t)) => f > t,
            _ => false,
        },
    }
}

/// Guard primitive-typed UDF parameters against NULL inputs: when any such
/// argument is NULL the call itself is skipped and NULL returned.
///
/// Guards are installed for every primitive parameter, nullable input or
/// not, until a more reliable nullability signal exists.
pub struct HandleNullInputsForUdf;

impl AnalyzerRule for HandleNullInputsForUdf {
    fn name(&self) -> &str {
        "handle-null-inputs-for-udf"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if !p.resolved() {
                return Ok(p);
            }
            p.map_expressions(&mut |e| {
                e.transform_up(&mut |e| match e {
                    Expr::ScalarUdf {
                        name,
                        args,
                        return_type,
                        param_types,
                        primitive_params,
                        deterministic,
                        null_safe: false,
                    } if primitive_params.iter().any(|p| *p) => {
                        let checks: Vec<Expr> = args
                            .iter()
                            .zip(primitive_params.iter())
                            .filter(|(_, primitive)| **primitive)
                            .map(|(arg, _)| Expr::IsNull(Box::new(arg.clone())))
                            .collect();
                        let condition = checks
                            .into_iter()
                            .reduce(Expr::or)
                            .expect("at least one primitive parameter");
                        let guarded = Expr::ScalarUdf {
                            name,
                            args,
                            return_type: return_type.clone(),
                            param_types,
                            primitive_params,
                            deterministic,
                            null_safe: true,
                        };
                        Ok(Expr::if_else(
                            condition,
                            Expr::null(return_type),
                            guarded,
                        ))
                    }
                    other => Ok(other),
                })
            })
        })
    }
}
