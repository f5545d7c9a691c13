use arrow_schema::DataType;
use flint_common::{FlintError, Result};

use crate::explain::format_expr;
use crate::expr::{AttributeRef, Expr};
use crate::logical_plan::LogicalPlan;

/// Terminal validation pass: asserts full resolution and the structural
/// invariants, raising the first diagnostic found in a bottom-up walk so the
/// deepest cause is reported.
pub fn check_analysis(plan: &LogicalPlan) -> Result<()> {
    plan.foreach_up(&mut |node| {
        check_expressions(node)?;
        check_operator(node)
    })?;

    if !plan.resolved() {
        let mut culprit: Option<&'static str> = None;
        plan.foreach_up(&mut |node| {
            if culprit.is_none() && !node.resolved() && node.children_resolved() {
                culprit = Some(node.node_name());
            }
            Ok(())
        })?;
        return Err(FlintError::analysis(format!(
            "unresolved operator {}",
            culprit.unwrap_or("in plan")
        )));
    }
    Ok(())
}

fn check_expressions(node: &LogicalPlan) -> Result<()> {
    let input_columns: Vec<String> = node
        .children()
        .iter()
        .flat_map(|c| c.output())
        .map(|a| a.qualified_name())
        .collect();

    for expr in node.expressions() {
        let mut found: Option<FlintError> = None;
        expr.visit(&mut |e| {
            if found.is_some() {
                return;
            }
            found = match e {
                Expr::UnresolvedAttribute { name_parts }
                    if name_parts.len() == 1 && name_parts[0] == "grouping__id" =>
                {
                    Some(FlintError::analysis(
                        "grouping__id is deprecated; use grouping_id() instead",
                    ))
                }
                Expr::UnresolvedAttribute { name_parts } => Some(FlintError::analysis(format!(
                    "cannot resolve '{}' given input columns: [{}]",
                    name_parts.join("."),
                    input_columns.join(", ")
                ))),
                Expr::UnresolvedFunction { name, .. } => Some(FlintError::analysis(format!(
                    "Undefined function: '{name}'"
                ))),
                Expr::Star { .. } => Some(FlintError::analysis(format!(
                    "Invalid usage of '*' in expression '{}'",
                    format_expr(expr)
                ))),
                Expr::Grouping { .. } | Expr::GroupingId { .. } => Some(FlintError::analysis(
                    "grouping()/grouping_id() can only be used with GroupingSets/Cube/Rollup",
                )),
                Expr::WindowExpression { .. }
                    if !matches!(node, LogicalPlan::Window { .. }) =>
                {
                    Some(FlintError::analysis(format!(
                        "It is not allowed to use a window function inside {}",
                        node.node_name()
                    )))
                }
                Expr::Generator { .. } if !matches!(node, LogicalPlan::Generate { .. }) => {
                    Some(FlintError::analysis(
                        "Generators are not supported when it's nested in expressions",
                    ))
                }
                _ => None,
            };
        });
        if let Some(err) = found {
            return Err(err);
        }
    }
    Ok(())
}

fn check_operator(node: &LogicalPlan) -> Result<()> {
    match node {
        LogicalPlan::Filter { condition, .. } if condition.resolved() => {
            if condition.data_type()? != DataType::Boolean {
                return Err(FlintError::analysis(format!(
                    "filter expression '{}' of type {:?} is not a boolean",
                    format_expr(condition),
                    condition.data_type()?
                )));
            }
            if has_aggregate(condition) {
                return Err(FlintError::analysis(format!(
                    "It is not allowed to use an aggregate function in filter condition: {}",
                    format_expr(condition)
                )));
            }
        }
        LogicalPlan::Sort { order, .. } => {
            for s in order {
                if has_aggregate(&s.expr) {
                    return Err(FlintError::analysis(format!(
                        "It is not allowed to use an aggregate function in sort order: {}",
                        format_expr(&s.expr)
                    )));
                }
            }
        }
        LogicalPlan::Aggregate {
            grouping,
            aggregates,
            ..
        } => {
            for g in grouping {
                if has_aggregate(g) {
                    return Err(FlintError::analysis(format!(
                        "aggregate functions are not allowed in GROUP BY, but found {}",
                        format_expr(g)
                    )));
                }
            }
            for a in aggregates {
                check_aggregate_item(a, grouping)?;
            }
        }
        LogicalPlan::Join {
            condition: Some(condition),
            ..
        } if condition.resolved() => {
            if condition.data_type()? != DataType::Boolean {
                return Err(FlintError::analysis(format!(
                    "join condition '{}' of type {:?} is not a boolean",
                    format_expr(condition),
                    condition.data_type()?
                )));
            }
        }
        LogicalPlan::Union { inputs } => {
            let widths: Vec<usize> = inputs.iter().map(|i| i.output().len()).collect();
            if widths.windows(2).any(|w| w[0] != w[1]) {
                return Err(FlintError::analysis(format!(
                    "Union can only be performed on inputs with the same number of columns, \
                     but the inputs have {widths:?} columns"
                )));
            }
        }
        LogicalPlan::Intersect { left, right } => {
            if left.output().len() != right.output().len() {
                return Err(FlintError::analysis(format!(
                    "Intersect can only be performed on inputs with the same number of \
                     columns, but the inputs have {} and {} columns",
                    left.output().len(),
                    right.output().len()
                )));
            }
        }
        _ => {}
    }

    // Every reference must be producible by a child (or by the node itself,
    // which is covered because expressions() only lists consumed positions).
    if node.children_resolved() && node.resolved() {
        let inputs = node.input_set();
        let own: Vec<AttributeRef> = node.output();
        for expr in node.expressions() {
            for attr in expr.references().iter() {
                let available =
                    inputs.contains_id(attr.id) || own.iter().any(|o| o.id == attr.id);
                if !available && !node.children().is_empty() {
                    return Err(FlintError::analysis(format!(
                        "Resolved attribute(s) {} missing from [{}] in operator {}",
                        attr.qualified_name(),
                        inputs
                            .iter()
                            .map(AttributeRef::qualified_name)
                            .collect::<Vec<_>>()
                            .join(", "),
                        node.node_name()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn has_aggregate(e: &Expr) -> bool {
    e.exists(&mut |x| matches!(x, Expr::AggregateExpression { .. }))
}

/// Every ungrouped reference in an aggregate output column must appear in
/// the grouping expressions; references under an aggregate function are
/// free.
fn check_aggregate_item(e: &Expr, grouping: &[Expr]) -> Result<()> {
    if grouping.iter().any(|g| g.semantic_eq(e)) {
        return Ok(());
    }
    match e {
        Expr::AggregateExpression { .. } => Ok(()),
        Expr::WindowExpression { .. } => Ok(()),
        Expr::Attribute(a) => Err(FlintError::analysis(format!(
            "expression '{}' is neither present in the group by, nor is it an aggregate \
             function. Add to group by or wrap in first() if you don't care which value you get",
            a.qualified_name()
        ))),
        other => {
            for c in other.children() {
                check_aggregate_item(c, grouping)?;
            }
            Ok(())
        }
    }
}
