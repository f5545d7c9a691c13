use std::collections::HashMap;

use flint_common::{ExprId, FlintError, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::TableId;
use crate::expr::{AttributeRef, AttributeSet, Expr, LiteralValue, SortOrder, WindowSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    Cross,
}

/// The operator algebra the analyzer rewrites.
///
/// Plans are immutable trees; every rewrite builds a new tree sharing
/// untouched children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    /// A relation reference not yet bound against the catalog.
    UnresolvedRelation {
        table: TableId,
        alias: Option<String>,
    },
    /// A catalog-bound base relation. Instances can re-mint their output ids
    /// so the same table can appear twice in one plan.
    Relation {
        table: String,
        output: Vec<AttributeRef>,
    },
    /// An in-memory relation; with an empty schema it acts as the one-row
    /// relation literal selects are planned against.
    LocalRelation {
        output: Vec<AttributeRef>,
    },
    Project {
        list: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    Filter {
        condition: Expr,
        input: Box<LogicalPlan>,
    },
    Aggregate {
        grouping: Vec<Expr>,
        aggregates: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    Sort {
        order: Vec<SortOrder>,
        global: bool,
        input: Box<LogicalPlan>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        condition: Option<Expr>,
    },
    Union {
        inputs: Vec<LogicalPlan>,
    },
    Intersect {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    SubqueryAlias {
        alias: String,
        input: Box<LogicalPlan>,
    },
    With {
        input: Box<LogicalPlan>,
        ctes: Vec<(String, LogicalPlan)>,
    },
    WithWindowDefinition {
        definitions: HashMap<String, WindowSpec>,
        input: Box<LogicalPlan>,
    },
    Window {
        window_exprs: Vec<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<SortOrder>,
        input: Box<LogicalPlan>,
    },
    /// Emits one output row per projection list per input row.
    Expand {
        projections: Vec<Vec<Expr>>,
        output: Vec<AttributeRef>,
        input: Box<LogicalPlan>,
    },
    Generate {
        generator: Expr,
        join: bool,
        outer: bool,
        qualifier: Option<String>,
        generator_output: Vec<AttributeRef>,
        input: Box<LogicalPlan>,
    },
    Pivot {
        group_by: Vec<Expr>,
        pivot_column: Expr,
        pivot_values: Vec<LiteralValue>,
        aggregates: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    GroupingSets {
        bitmasks: Vec<u64>,
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    InsertIntoTable {
        table: Box<LogicalPlan>,
        input: Box<LogicalPlan>,
        overwrite: bool,
    },
    ScriptTransformation {
        input_exprs: Vec<Expr>,
        script: String,
        output: Vec<AttributeRef>,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// Short operator name for diagnostics.
    pub fn node_name(&self) -> &'static str {
        match self {
            LogicalPlan::UnresolvedRelation { .. } => "UnresolvedRelation",
            LogicalPlan::Relation { .. } => "Relation",
            LogicalPlan::LocalRelation { .. } => "LocalRelation",
            LogicalPlan::Project { .. } => "Project",
            LogicalPlan::Filter { .. } => "Filter",
            LogicalPlan::Aggregate { .. } => "Aggregate",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Join { .. } => "Join",
            LogicalPlan::Union { .. } => "Union",
            LogicalPlan::Intersect { .. } => "Intersect",
            LogicalPlan::SubqueryAlias { .. } => "SubqueryAlias",
            LogicalPlan::With { .. } => "With",
            LogicalPlan::WithWindowDefinition { .. } => "WithWindowDefinition",
            LogicalPlan::Window { .. } => "Window",
            LogicalPlan::Expand { .. } => "Expand",
            LogicalPlan::Generate { .. } => "Generate",
            LogicalPlan::Pivot { .. } => "Pivot",
            LogicalPlan::GroupingSets { .. } => "GroupingSets",
            LogicalPlan::InsertIntoTable { .. } => "InsertIntoTable",
            LogicalPlan::ScriptTransformation { .. } => "ScriptTransformation",
        }
    }

    // ---- traversal --------------------------------------------------------

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::UnresolvedRelation { .. }
            | LogicalPlan::Relation { .. }
            | LogicalPlan::LocalRelation { .. } => vec![],
            LogicalPlan::Project { input, .. }
            | LogicalPlan::Filter { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::SubqueryAlias { input, .. }
            | LogicalPlan::With { input, .. }
            | LogicalPlan::WithWindowDefinition { input, .. }
            | LogicalPlan::Window { input, .. }
            | LogicalPlan::Expand { input, .. }
            | LogicalPlan::Generate { input, .. }
            | LogicalPlan::Pivot { input, .. }
            | LogicalPlan::GroupingSets { input, .. }
            | LogicalPlan::ScriptTransformation { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } | LogicalPlan::Intersect { left, right } => {
                vec![left.as_ref(), right.as_ref()]
            }
            LogicalPlan::Union { inputs } => inputs.iter().collect(),
            LogicalPlan::InsertIntoTable { input, .. } => vec![input.as_ref()],
        }
    }

    pub fn map_children<F>(self, f: &mut F) -> Result<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> Result<LogicalPlan>,
    {
        fn fbox<F>(p: Box<LogicalPlan>, f: &mut F) -> Result<Box<LogicalPlan>>
        where
            F: FnMut(LogicalPlan) -> Result<LogicalPlan>,
        {
            Ok(Box::new(f(*p)?))
        }

        Ok(match self {
            leaf @ (LogicalPlan::UnresolvedRelation { .. }
            | LogicalPlan::Relation { .. }
            | LogicalPlan::LocalRelation { .. }) => leaf,
            LogicalPlan::Project { list, input } => LogicalPlan::Project {
                list,
                input: fbox(input, f)?,
            },
            LogicalPlan::Filter { condition, input } => LogicalPlan::Filter {
                condition,
                input: fbox(input, f)?,
            },
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            } => LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input: fbox(input, f)?,
            },
            LogicalPlan::Sort {
                order,
                global,
                input,
            } => LogicalPlan::Sort {
                order,
                global,
                input: fbox(input, f)?,
            },
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
            } => LogicalPlan::Join {
                left: fbox(left, f)?,
                right: fbox(right, f)?,
                join_type,
                condition,
            },
            LogicalPlan::Union { inputs } => LogicalPlan::Union {
                inputs: inputs.into_iter().map(|p| f(p)).collect::<Result<_>>()?,
            },
            LogicalPlan::Intersect { left, right } => LogicalPlan::Intersect {
                left: fbox(left, f)?,
                right: fbox(right, f)?,
            },
            LogicalPlan::SubqueryAlias { alias, input } => LogicalPlan::SubqueryAlias {
                alias,
                input: fbox(input, f)?,
            },
            LogicalPlan::With { input, ctes } => LogicalPlan::With {
                input: fbox(input, f)?,
                ctes,
            },
            LogicalPlan::WithWindowDefinition { definitions, input } => {
                LogicalPlan::WithWindowDefinition {
                    definitions,
                    input: fbox(input, f)?,
                }
            }
            LogicalPlan::Window {
                window_exprs,
                partition_by,
                order_by,
                input,
            } => LogicalPlan::Window {
                window_exprs,
                partition_by,
                order_by,
                input: fbox(input, f)?,
            },
            LogicalPlan::Expand {
                projections,
                output,
                input,
            } => LogicalPlan::Expand {
                projections,
                output,
                input: fbox(input, f)?,
            },
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                qualifier,
                generator_output,
                input,
            } => LogicalPlan::Generate {
                generator,
                join,
                outer,
                qualifier,
                generator_output,
                input: fbox(input, f)?,
            },
            LogicalPlan::Pivot {
                group_by,
                pivot_column,
                pivot_values,
                aggregates,
                input,
            } => LogicalPlan::Pivot {
                group_by,
                pivot_column,
                pivot_values,
                aggregates,
                input: fbox(input, f)?,
            },
            LogicalPlan::GroupingSets {
                bitmasks,
                group_by,
                aggregates,
                input,
            } => LogicalPlan::GroupingSets {
                bitmasks,
                group_by,
                aggregates,
                input: fbox(input, f)?,
            },
            LogicalPlan::InsertIntoTable {
                table,
                input,
                overwrite,
            } => LogicalPlan::InsertIntoTable {
                table,
                input: fbox(input, f)?,
                overwrite,
            },
            LogicalPlan::ScriptTransformation {
                input_exprs,
                script,
                output,
                input,
            } => LogicalPlan::ScriptTransformation {
                input_exprs,
                script,
                output,
                input: fbox(input, f)?,
            },
        })
    }

    /// Post-order plan rewrite.
    pub fn transform_up<F>(self, f: &mut F) -> Result<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> Result<LogicalPlan>,
    {
        let node = self.map_children(&mut |c| c.transform_up(&mut *f))?;
        f(node)
    }

    /// Pre-order plan rewrite.
    pub fn transform_down<F>(self, f: &mut F) -> Result<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> Result<LogicalPlan>,
    {
        let node = f(self)?;
        node.map_children(&mut |c| c.transform_down(&mut *f))
    }

    /// Post-order visit (children before parents), the order CheckAnalysis
    /// reports diagnostics in.
    pub fn foreach_up<F>(&self, f: &mut F) -> Result<()>
    where
        F: FnMut(&LogicalPlan) -> Result<()>,
    {
        for child in self.children() {
            child.foreach_up(f)?;
        }
        f(self)
    }

    /// This node's own expressions (no recursion into child plans).
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            LogicalPlan::Project { list, .. } => list.iter().collect(),
            LogicalPlan::Filter { condition, .. } => vec![condition],
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                ..
            } => grouping.iter().chain(aggregates.iter()).collect(),
            LogicalPlan::Sort { order, .. } => order.iter().map(|s| &s.expr).collect(),
            LogicalPlan::Join { condition, .. } => condition.iter().collect(),
            LogicalPlan::Window {
                window_exprs,
                partition_by,
                order_by,
                ..
            } => window_exprs
                .iter()
                .chain(partition_by.iter())
                .chain(order_by.iter().map(|s| &s.expr))
                .collect(),
            LogicalPlan::Expand { projections, .. } => projections.iter().flatten().collect(),
            LogicalPlan::Generate { generator, .. } => vec![generator],
            LogicalPlan::Pivot {
                group_by,
                pivot_column,
                aggregates,
                ..
            } => group_by
                .iter()
                .chain(std::iter::once(pivot_column))
                .chain(aggregates.iter())
                .collect(),
            LogicalPlan::GroupingSets {
                group_by,
                aggregates,
                ..
            } => group_by.iter().chain(aggregates.iter()).collect(),
            LogicalPlan::ScriptTransformation { input_exprs, .. } => input_exprs.iter().collect(),
            _ => vec![],
        }
    }

    /// Rebuild this node with each of its own expressions passed through `f`.
    pub fn map_expressions<F>(self, f: &mut F) -> Result<LogicalPlan>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        fn fvec<F>(es: Vec<Expr>, f: &mut F) -> Result<Vec<Expr>>
        where
            F: FnMut(Expr) -> Result<Expr>,
        {
            es.into_iter().map(f).collect()
        }
        fn forder<F>(os: Vec<SortOrder>, f: &mut F) -> Result<Vec<SortOrder>>
        where
            F: FnMut(Expr) -> Result<Expr>,
        {
            os.into_iter()
                .map(|s| {
                    Ok(SortOrder {
                        expr: f(s.expr)?,
                        direction: s.direction,
                    })
                })
                .collect()
        }

        Ok(match self {
            LogicalPlan::Project { list, input } => LogicalPlan::Project {
                list: fvec(list, f)?,
                input,
            },
            LogicalPlan::Filter { condition, input } => LogicalPlan::Filter {
                condition: f(condition)?,
                input,
            },
            LogicalPlan::Aggregate {
                grouping,
                aggregates,
                input,
            } => LogicalPlan::Aggregate {
                grouping: fvec(grouping, f)?,
                aggregates: fvec(aggregates, f)?,
                input,
            },
            LogicalPlan::Sort {
                order,
                global,
                input,
            } => LogicalPlan::Sort {
                order: forder(order, f)?,
                global,
                input,
            },
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
            } => LogicalPlan::Join {
                left,
                right,
                join_type,
                condition: condition.map(f).transpose()?,
            },
            LogicalPlan::Window {
                window_exprs,
                partition_by,
                order_by,
                input,
            } => LogicalPlan::Window {
                window_exprs: fvec(window_exprs, f)?,
                partition_by: fvec(partition_by, f)?,
                order_by: forder(order_by, f)?,
                input,
            },
            LogicalPlan::Expand {
                projections,
                output,
                input,
            } => LogicalPlan::Expand {
                projections: projections
                    .into_iter()
                    .map(|p| fvec(p, f))
                    .collect::<Result<_>>()?,
                output,
                input,
            },
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                qualifier,
                generator_output,
                input,
            } => LogicalPlan::Generate {
                generator: f(generator)?,
                join,
                outer,
                qualifier,
                generator_output,
                input,
            },
            LogicalPlan::Pivot {
                group_by,
                pivot_column,
                pivot_values,
                aggregates,
                input,
            } => LogicalPlan::Pivot {
                group_by: fvec(group_by, f)?,
                pivot_column: f(pivot_column)?,
                pivot_values,
                aggregates: fvec(aggregates, f)?,
                input,
            },
            LogicalPlan::GroupingSets {
                bitmasks,
                group_by,
                aggregates,
                input,
            } => LogicalPlan::GroupingSets {
                bitmasks,
                group_by: fvec(group_by, f)?,
                aggregates: fvec(aggregates, f)?,
                input,
            },
            LogicalPlan::ScriptTransformation {
                input_exprs,
                script,
                output,
                input,
            } => LogicalPlan::ScriptTransformation {
                input_exprs: fvec(input_exprs, f)?,
                script,
                output,
                input,
            },
            other => other,
        })
    }

    /// Apply `f` bottom-up to every expression of every node in the tree.
    pub fn transform_expressions_up<F>(self, f: &mut F) -> Result<LogicalPlan>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        self.transform_up(&mut |p| p.map_expressions(&mut |e| e.transform_up(&mut *f)))
    }

    /// Normalized copy for structural comparison: every expression is
    /// canonicalized, so cosmetic expression-id differences (alias ids,
    /// aggregate result ids) disappear while attribute identity is kept.
    pub fn canonicalized(&self) -> LogicalPlan {
        self.clone()
            .transform_up(&mut |p| p.map_expressions(&mut |e| Ok(e.canonicalized())))
            .expect("canonicalization is infallible")
    }

    /// Replace attribute references by id throughout the tree.
    pub fn rewrite_attributes(self, mapping: &[(ExprId, AttributeRef)]) -> LogicalPlan {
        self.transform_expressions_up(&mut |e| {
            Ok(match e {
                Expr::Attribute(a) => {
                    match mapping.iter().find(|(old, _)| *old == a.id) {
                        Some((_, new)) => {
                            // Keep the reference's own qualifier spelling.
                            let mut replacement = new.clone();
                            replacement.qualifier = a.qualifier;
                            Expr::Attribute(replacement)
                        }
                        None => Expr::Attribute(a),
                    }
                }
                other => other,
            })
        })
        .expect("attribute rewrite is infallible")
    }

    /// Replace the only child of a unary node.
    pub fn with_new_child(self, new_child: LogicalPlan) -> Result<LogicalPlan> {
        let name = self.node_name();
        let mut replaced = false;
        let out = self.map_children(&mut |_| {
            if replaced {
                return Err(FlintError::Internal(format!(
                    "with_new_child on non-unary operator {name}"
                )));
            }
            replaced = true;
            Ok(new_child.clone())
        })?;
        if !replaced {
            return Err(FlintError::Internal(format!(
                "with_new_child on leaf operator {name}"
            )));
        }
        Ok(out)
    }

    // ---- derived properties ------------------------------------------------

    /// Attributes this operator produces, in order. Only fully meaningful
    /// once the node's expressions are resolved; unresolved named expressions
    /// contribute placeholder attributes.
    pub fn output(&self) -> Vec<AttributeRef> {
        fn named(exprs: &[Expr]) -> Vec<AttributeRef> {
            exprs
                .iter()
                .map(|e| {
                    e.to_attribute().unwrap_or_else(|| AttributeRef {
                        name: crate::explain::format_expr(e),
                        data_type: arrow_schema::DataType::Null,
                        nullable: true,
                        id: ExprId(0),
                        qualifier: None,
                    })
                })
                .collect()
        }

        match self {
            LogicalPlan::UnresolvedRelation { .. } => vec![],
            LogicalPlan::Relation { output, .. }
            | LogicalPlan::LocalRelation { output }
            | LogicalPlan::Expand { output, .. }
            | LogicalPlan::ScriptTransformation { output, .. } => output.clone(),
            LogicalPlan::Project { list, .. } => named(list),
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::With { input, .. }
            | LogicalPlan::WithWindowDefinition { input, .. } => input.output(),
            LogicalPlan::Aggregate { aggregates, .. } => named(aggregates),
            LogicalPlan::GroupingSets { aggregates, .. } => named(aggregates),
            LogicalPlan::Pivot { group_by, .. } => named(group_by),
            LogicalPlan::SubqueryAlias { alias, input } => input
                .output()
                .into_iter()
                .map(|a| {
                    let mut a = a;
                    a.qualifier = Some(alias.clone());
                    a
                })
                .collect(),
            LogicalPlan::Window {
                window_exprs,
                input,
                ..
            } => {
                let mut out = input.output();
                out.extend(named(window_exprs));
                out
            }
            LogicalPlan::Generate {
                join,
                qualifier,
                generator_output,
                input,
                ..
            } => {
                let qualified: Vec<AttributeRef> = generator_output
                    .iter()
                    .map(|a| {
                        let mut a = a.clone();
                        if let Some(q) = qualifier {
                            a.qualifier = Some(q.clone());
                        }
                        a
                    })
                    .collect();
                if *join {
                    let mut out = input.output();
                    out.extend(qualified);
                    out
                } else {
                    qualified
                }
            }
            LogicalPlan::Join {
                left,
                right,
                join_type,
                ..
            } => {
                let l = left.output();
                let r = right.output();
                match join_type {
                    JoinType::LeftSemi => l,
                    JoinType::Inner | JoinType::Cross => {
                        l.into_iter().chain(r.into_iter()).collect()
                    }
                    JoinType::LeftOuter => l
                        .into_iter()
                        .chain(r.into_iter().map(|a| a.with_nullable(true)))
                        .collect(),
                    JoinType::RightOuter => l
                        .into_iter()
                        .map(|a| a.with_nullable(true))
                        .chain(r.into_iter())
                        .collect(),
                    JoinType::FullOuter => l
                        .into_iter()
                        .chain(r.into_iter())
                        .map(|a| a.with_nullable(true))
                        .collect(),
                }
            }
            LogicalPlan::Union { inputs } => {
                let Some(first) = inputs.first() else {
                    return vec![];
                };
                let mut out = first.output();
                for other in &inputs[1..] {
                    for (a, b) in out.iter_mut().zip(other.output()) {
                        a.nullable = a.nullable || b.nullable;
                    }
                }
                out
            }
            LogicalPlan::Intersect { left, .. } => left.output(),
            LogicalPlan::InsertIntoTable { .. } => vec![],
        }
    }

    pub fn output_set(&self) -> AttributeSet {
        AttributeSet::from_attrs(self.output())
    }

    /// Attributes available from this node's children.
    pub fn input_set(&self) -> AttributeSet {
        let mut set = AttributeSet::default();
        for child in self.children() {
            for a in child.output() {
                set.insert(a);
            }
        }
        set
    }

    pub fn children_resolved(&self) -> bool {
        self.children().iter().all(|c| c.resolved())
    }

    /// Whether this subtree is fully analyzed: no structural placeholders and
    /// every expression bound and typed.
    pub fn resolved(&self) -> bool {
        match self {
            LogicalPlan::UnresolvedRelation { .. }
            | LogicalPlan::With { .. }
            | LogicalPlan::WithWindowDefinition { .. }
            | LogicalPlan::Pivot { .. }
            | LogicalPlan::GroupingSets { .. } => false,
            LogicalPlan::Generate {
                generator,
                generator_output,
                ..
            } => {
                self.children_resolved()
                    && generator.resolved()
                    && matches!(generator, Expr::Generator { .. })
                    && !generator_output.is_empty()
            }
            LogicalPlan::Join { left, right, .. } | LogicalPlan::Intersect { left, right } => {
                self.children_resolved()
                    && self.expressions().iter().all(|e| e.resolved())
                    && left.output_set().intersect(&right.output_set()).is_empty()
            }
            LogicalPlan::InsertIntoTable { table, input, .. } => {
                table.resolved() && input.resolved()
            }
            _ => self.children_resolved() && self.expressions().iter().all(|e| e.resolved()),
        }
    }

    /// Fresh-id copy for relations that may appear several times in a plan.
    pub fn new_instance(&self) -> Option<LogicalPlan> {
        match self {
            LogicalPlan::Relation { table, output } => Some(LogicalPlan::Relation {
                table: table.clone(),
                output: output.iter().map(AttributeRef::new_instance).collect(),
            }),
            LogicalPlan::LocalRelation { output } => Some(LogicalPlan::LocalRelation {
                output: output.iter().map(AttributeRef::new_instance).collect(),
            }),
            _ => None,
        }
    }

    // ---- constructors used throughout the rules ---------------------------

    pub fn project(list: Vec<Expr>, input: LogicalPlan) -> LogicalPlan {
        LogicalPlan::Project {
            list,
            input: Box::new(input),
        }
    }

    pub fn filter(condition: Expr, input: LogicalPlan) -> LogicalPlan {
        LogicalPlan::Filter {
            condition,
            input: Box::new(input),
        }
    }

    /// Projection that forwards the given attributes unchanged.
    pub fn project_attrs(attrs: &[AttributeRef], input: LogicalPlan) -> LogicalPlan {
        LogicalPlan::project(
            attrs.iter().cloned().map(Expr::Attribute).collect(),
            input,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::DataType;

    fn relation(table: &str, cols: &[&str]) -> LogicalPlan {
        LogicalPlan::Relation {
            table: table.to_string(),
            output: cols
                .iter()
                .map(|c| AttributeRef::new(*c, DataType::Int64, true).with_qualifier(table))
                .collect(),
        }
    }

    #[test]
    fn join_with_shared_ids_is_not_resolved() {
        let t = relation("t", &["a"]);
        let join = LogicalPlan::Join {
            left: Box::new(t.clone()),
            right: Box::new(t),
            join_type: JoinType::Inner,
            condition: None,
        };
        assert!(!join.resolved());
    }

    #[test]
    fn new_instance_mints_disjoint_ids() {
        let t = relation("t", &["a", "b"]);
        let copy = t.new_instance().expect("relation instance");
        assert!(t.output_set().intersect(&copy.output_set()).is_empty());
        assert_eq!(
            t.output().iter().map(|a| &a.name).collect::<Vec<_>>(),
            copy.output().iter().map(|a| &a.name).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn subquery_alias_requalifies_output() {
        let t = relation("t", &["a"]);
        let aliased = LogicalPlan::SubqueryAlias {
            alias: "x".to_string(),
            input: Box::new(t),
        };
        assert_eq!(aliased.output()[0].qualifier.as_deref(), Some("x"));
    }

    #[test]
    fn canonicalized_erases_alias_ids() {
        let t = relation("t", &["a"]);
        let attr = t.output()[0].clone();
        let aliased = |id: ExprId| LogicalPlan::Project {
            list: vec![Expr::Alias {
                child: Box::new(Expr::Attribute(attr.clone())),
                name: "x".to_string(),
                id,
            }],
            input: Box::new(t.clone()),
        };
        let one = aliased(ExprId::fresh());
        let two = aliased(ExprId::fresh());
        assert_ne!(one, two, "derived equality sees the id difference");
        assert_eq!(one.canonicalized(), two.canonicalized());
    }

    #[test]
    fn sort_preserves_child_output() {
        let t = relation("t", &["a", "b"]);
        let out = t.output();
        let sorted = LogicalPlan::Sort {
            order: vec![SortOrder::asc(Expr::Attribute(out[1].clone()))],
            global: true,
            input: Box::new(t),
        };
        assert_eq!(sorted.output(), out);
    }
}
