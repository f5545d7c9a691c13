use crate::expr::{Expr, LiteralValue, SortDirection, SortOrder, WindowFrameBound, WindowSpec};
use crate::logical_plan::LogicalPlan;

/// Render a logical plan as human-readable multiline text.
///
/// Works on resolved and unresolved trees alike; attributes print as
/// `name#id` so id provenance is visible in test failures and diagnostics.
pub fn explain_logical(plan: &LogicalPlan) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, &mut s);
    s
}

fn fmt_plan(plan: &LogicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        LogicalPlan::UnresolvedRelation { table, alias } => {
            out.push_str(&format!("{pad}UnresolvedRelation {table}"));
            if let Some(a) = alias {
                out.push_str(&format!(" AS {a}"));
            }
            out.push('\n');
        }
        LogicalPlan::Relation { table, output } => {
            out.push_str(&format!("{pad}Relation {table} [{}]\n", fmt_attrs(output)));
        }
        LogicalPlan::LocalRelation { output } => {
            out.push_str(&format!("{pad}LocalRelation [{}]\n", fmt_attrs(output)));
        }
        LogicalPlan::Project { list, input } => {
            out.push_str(&format!("{pad}Project [{}]\n", fmt_exprs(list)));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Filter { condition, input } => {
            out.push_str(&format!("{pad}Filter {}\n", format_expr(condition)));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Aggregate {
            grouping,
            aggregates,
            input,
        } => {
            out.push_str(&format!(
                "{pad}Aggregate group=[{}] aggs=[{}]\n",
                fmt_exprs(grouping),
                fmt_exprs(aggregates)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Sort {
            order,
            global,
            input,
        } => {
            out.push_str(&format!(
                "{pad}Sort global={global} [{}]\n",
                fmt_order(order)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Join {
            left,
            right,
            join_type,
            condition,
        } => {
            out.push_str(&format!("{pad}Join {join_type:?}"));
            if let Some(c) = condition {
                out.push_str(&format!(" on {}", format_expr(c)));
            }
            out.push('\n');
            fmt_plan(left, indent + 1, out);
            fmt_plan(right, indent + 1, out);
        }
        LogicalPlan::Union { inputs } => {
            out.push_str(&format!("{pad}Union\n"));
            for i in inputs {
                fmt_plan(i, indent + 1, out);
            }
        }
        LogicalPlan::Intersect { left, right } => {
            out.push_str(&format!("{pad}Intersect\n"));
            fmt_plan(left, indent + 1, out);
            fmt_plan(right, indent + 1, out);
        }
        LogicalPlan::SubqueryAlias { alias, input } => {
            out.push_str(&format!("{pad}SubqueryAlias {alias}\n"));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::With { input, ctes } => {
            out.push_str(&format!(
                "{pad}With [{}]\n",
                ctes.iter()
                    .map(|(n, _)| n.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            for (_, cte) in ctes {
                fmt_plan(cte, indent + 1, out);
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::WithWindowDefinition { definitions, input } => {
            let mut names: Vec<&String> = definitions.keys().collect();
            names.sort();
            out.push_str(&format!(
                "{pad}WithWindowDefinition [{}]\n",
                names
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Window {
            window_exprs,
            partition_by,
            order_by,
            input,
        } => {
            out.push_str(&format!(
                "{pad}Window [{}] partition=[{}] order=[{}]\n",
                fmt_exprs(window_exprs),
                fmt_exprs(partition_by),
                fmt_order(order_by)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Expand {
            projections,
            output,
            input,
        } => {
            out.push_str(&format!(
                "{pad}Expand projections={} [{}]\n",
                projections.len(),
                fmt_attrs(output)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Generate {
            generator,
            join,
            outer,
            generator_output,
            input,
            ..
        } => {
            out.push_str(&format!(
                "{pad}Generate {} join={join} outer={outer} [{}]\n",
                format_expr(generator),
                fmt_attrs(generator_output)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Pivot {
            group_by,
            pivot_column,
            pivot_values,
            aggregates,
            input,
        } => {
            out.push_str(&format!(
                "{pad}Pivot group=[{}] col={} values=[{}] aggs=[{}]\n",
                fmt_exprs(group_by),
                format_expr(pivot_column),
                pivot_values
                    .iter()
                    .map(LiteralValue::render)
                    .collect::<Vec<_>>()
                    .join(", "),
                fmt_exprs(aggregates)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::GroupingSets {
            bitmasks,
            group_by,
            aggregates,
            input,
        } => {
            out.push_str(&format!(
                "{pad}GroupingSets masks={bitmasks:?} group=[{}] aggs=[{}]\n",
                fmt_exprs(group_by),
                fmt_exprs(aggregates)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::InsertIntoTable {
            table,
            input,
            overwrite,
        } => {
            out.push_str(&format!("{pad}InsertIntoTable overwrite={overwrite}\n"));
            fmt_plan(table, indent + 1, out);
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::ScriptTransformation {
            input_exprs,
            script,
            output,
            input,
        } => {
            out.push_str(&format!(
                "{pad}ScriptTransformation '{script}' [{}] -> [{}]\n",
                fmt_exprs(input_exprs),
                fmt_attrs(output)
            ));
            fmt_plan(input, indent + 1, out);
        }
    }
}

fn fmt_attrs(attrs: &[crate::expr::AttributeRef]) -> String {
    attrs
        .iter()
        .map(|a| format!("{}#{}", a.qualified_name(), a.id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_exprs(exprs: &[Expr]) -> String {
    exprs.iter().map(format_expr).collect::<Vec<_>>().join(", ")
}

fn fmt_order(order: &[SortOrder]) -> String {
    order
        .iter()
        .map(|s| {
            let dir = match s.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            format!("{} {dir}", format_expr(&s.expr))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_spec(spec: &WindowSpec) -> String {
    let mut parts = vec![];
    if !spec.partition_by.is_empty() {
        parts.push(format!("partition by {}", fmt_exprs(&spec.partition_by)));
    }
    if !spec.order_by.is_empty() {
        parts.push(format!("order by {}", fmt_order(&spec.order_by)));
    }
    if let Some(frame) = &spec.frame {
        parts.push(format!(
            "{:?} between {} and {}",
            frame.units,
            fmt_bound(&frame.start),
            fmt_bound(&frame.end)
        ));
    }
    parts.join(" ")
}

fn fmt_bound(bound: &WindowFrameBound) -> String {
    match bound {
        WindowFrameBound::UnboundedPreceding => "unbounded preceding".to_string(),
        WindowFrameBound::Preceding(n) => format!("{n} preceding"),
        WindowFrameBound::CurrentRow => "current row".to_string(),
        WindowFrameBound::Following(n) => format!("{n} following"),
        WindowFrameBound::UnboundedFollowing => "unbounded following".to_string(),
    }
}

/// Render an expression as compact single-line text; also the source of
/// generated alias names for bare expressions.
pub fn format_expr(e: &Expr) -> String {
    match e {
        Expr::Literal { value, .. } => match value {
            LiteralValue::Utf8(s) => format!("'{s}'"),
            other => other.render(),
        },
        Expr::Attribute(a) => format!("{}#{}", a.qualified_name(), a.id),
        Expr::UnresolvedAttribute { name_parts } => format!("'{}", name_parts.join(".")),
        Expr::UnresolvedFunction {
            name,
            args,
            distinct,
        } => {
            let d = if *distinct { "distinct " } else { "" };
            format!("'{name}({d}{})", fmt_exprs(args))
        }
        Expr::UnresolvedGenerator { name, args } => format!("'{name}({})", fmt_exprs(args)),
        Expr::UnresolvedAlias { child } => format_expr(child),
        Expr::UnresolvedExtractValue { child, field } => {
            format!("{}[{}]", format_expr(child), format_expr(field))
        }
        Expr::UnresolvedDeserializer { deserializer, .. } => {
            format!("deserializer({})", format_expr(deserializer))
        }
        Expr::UnresolvedWindowExpression { child, name } => {
            format!("{} OVER {name}", format_expr(child))
        }
        Expr::Star { qualifier } => match qualifier {
            Some(q) => format!("{q}.*"),
            None => "*".to_string(),
        },
        Expr::Alias { child, name, id } => format!("{} AS {name}#{id}", format_expr(child)),
        Expr::MultiAlias { child, names } => {
            format!("{} AS ({})", format_expr(child), names.join(", "))
        }
        Expr::BinaryOp { left, op, right } => {
            let sym = match op {
                crate::expr::BinaryOp::Eq => "=",
                crate::expr::BinaryOp::NotEq => "<>",
                crate::expr::BinaryOp::Lt => "<",
                crate::expr::BinaryOp::LtEq => "<=",
                crate::expr::BinaryOp::Gt => ">",
                crate::expr::BinaryOp::GtEq => ">=",
                crate::expr::BinaryOp::Plus => "+",
                crate::expr::BinaryOp::Minus => "-",
                crate::expr::BinaryOp::Multiply => "*",
                crate::expr::BinaryOp::Divide => "/",
                crate::expr::BinaryOp::ShiftRight => ">>",
                crate::expr::BinaryOp::BitAnd => "&",
            };
            format!("({} {sym} {})", format_expr(left), format_expr(right))
        }
        Expr::And(a, b) => format!("({} AND {})", format_expr(a), format_expr(b)),
        Expr::Or(a, b) => format!("({} OR {})", format_expr(a), format_expr(b)),
        Expr::Not(e) => format!("NOT {}", format_expr(e)),
        Expr::IsNull(e) => format!("{} IS NULL", format_expr(e)),
        Expr::IsNotNull(e) => format!("{} IS NOT NULL", format_expr(e)),
        Expr::Cast { expr, to_type } => format!("cast({} as {to_type:?})", format_expr(expr)),
        Expr::UpCast { expr, to_type } => format!("upcast({} as {to_type:?})", format_expr(expr)),
        Expr::If {
            condition,
            then_expr,
            else_expr,
        } => format!(
            "if({}, {}, {})",
            format_expr(condition),
            format_expr(then_expr),
            format_expr(else_expr)
        ),
        Expr::CreateStruct { children } => format!("struct({})", fmt_exprs(children)),
        Expr::CreateArray { children } => format!("array({})", fmt_exprs(children)),
        Expr::GetStructField { child, name, .. } => format!("{}.{name}", format_expr(child)),
        Expr::GetArrayItem { child, index } => {
            format!("{}[{}]", format_expr(child), format_expr(index))
        }
        Expr::GetMapValue { child, key } => {
            format!("{}[{}]", format_expr(child), format_expr(key))
        }
        Expr::ScalarFunction { name, args, .. } => format!("{name}({})", fmt_exprs(args)),
        Expr::ScalarUdf { name, args, .. } => format!("{name}({})", fmt_exprs(args)),
        Expr::AggregateFunction { kind, args, .. } => {
            format!("{}({})", kind.display_name(), fmt_exprs(args))
        }
        Expr::AggregateExpression { func, distinct, .. } => {
            if *distinct {
                match func.as_ref() {
                    Expr::AggregateFunction { kind, args, .. } => {
                        format!("{}(distinct {})", kind.display_name(), fmt_exprs(args))
                    }
                    other => format_expr(other),
                }
            } else {
                format_expr(func)
            }
        }
        Expr::WindowFunction { kind, args } => {
            format!("{}({})", kind.display_name(), fmt_exprs(args))
        }
        Expr::WindowExpression { function, spec } => {
            format!("{} OVER ({})", format_expr(function), fmt_spec(spec))
        }
        Expr::Generator { kind, args } => {
            format!("{}({})", kind.display_name(), fmt_exprs(args))
        }
        Expr::Grouping { child } => format!("grouping({})", format_expr(child)),
        Expr::GroupingId { children } => format!("grouping_id({})", fmt_exprs(children)),
        Expr::Cube { exprs } => format!("cube({})", fmt_exprs(exprs)),
        Expr::Rollup { exprs } => format!("rollup({})", fmt_exprs(exprs)),
        Expr::TimeWindow {
            time_column,
            window_duration,
            slide_duration,
            ..
        } => format!(
            "window({}, {window_duration}, {slide_duration})",
            format_expr(time_column)
        ),
        Expr::BoundReference { ordinal, .. } => format!("input[{ordinal}]"),
        Expr::NewInstance { class_name, args, .. } => {
            format!("newinstance({class_name}, {})", fmt_exprs(args))
        }
        Expr::Rand { seed } => format!("rand({seed})"),
        Expr::ScalarSubquery { .. } => "scalar-subquery".to_string(),
        Expr::Exists { .. } => "exists".to_string(),
        Expr::InSubquery { value, .. } => format!("{} IN (subquery)", format_expr(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AttributeRef;
    use arrow_schema::DataType;

    #[test]
    fn renders_attributes_with_ids() {
        let a = AttributeRef::new("a", DataType::Int64, true).with_qualifier("t");
        let rendered = format_expr(&Expr::Attribute(a.clone()));
        assert_eq!(rendered, format!("t.a#{}", a.id));
    }

    #[test]
    fn renders_plans_with_indentation() {
        let t = LogicalPlan::Relation {
            table: "t".to_string(),
            output: vec![AttributeRef::new("a", DataType::Int64, true)],
        };
        let plan = LogicalPlan::filter(Expr::boolean(true), t);
        let text = explain_logical(&plan);
        assert!(text.starts_with("Filter true\n  Relation t"), "{text}");
    }
}
