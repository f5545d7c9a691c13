use std::sync::Arc;

use arrow_schema::{DataType, Field, TimeUnit};
use flint_analyzer::expr::{WindowFrameBound, WindowFrameUnits};
use flint_analyzer::{
    Analyzer, AttributeRef, Expr, LiteralValue, LogicalPlan, MemoryCatalog, SortOrder, TableId,
    UdfDef, WindowSpec,
};
use flint_common::{AnalyzerConfig, FlintError};

fn catalog() -> MemoryCatalog {
    let mut cat = MemoryCatalog::new();
    cat.register_table(
        "t",
        vec![
            ("a", DataType::Int64, false),
            ("b", DataType::Int64, true),
            ("c", DataType::Int64, true),
        ],
    );
    cat.register_table(
        "u",
        vec![("a", DataType::Int64, false), ("d", DataType::Int64, true)],
    );
    cat.register_table(
        "v",
        vec![("x", DataType::Int64, false), ("y", DataType::Int64, true)],
    );
    cat.register_table(
        "arrs",
        vec![
            ("id", DataType::Int64, false),
            (
                "xs",
                DataType::List(Arc::new(Field::new("item", DataType::Int64, true))),
                true,
            ),
        ],
    );
    cat.register_table(
        "events",
        vec![
            (
                "ts",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            ("val", DataType::Int64, true),
        ],
    );
    cat
}

fn analyzer() -> Analyzer {
    Analyzer::new(Arc::new(catalog()), AnalyzerConfig::default())
}

fn analyze(plan: LogicalPlan) -> LogicalPlan {
    analyzer()
        .analyze(plan)
        .unwrap_or_else(|e| panic!("analysis failed: {e}"))
}

fn analyze_err(plan: LogicalPlan) -> String {
    match analyzer().analyze(plan) {
        Ok(p) => panic!(
            "expected analysis failure, got:\n{}",
            flint_analyzer::explain_logical(&p)
        ),
        Err(e) => e.to_string(),
    }
}

fn table(name: &str) -> LogicalPlan {
    LogicalPlan::UnresolvedRelation {
        table: TableId::bare(name),
        alias: None,
    }
}

fn unresolved_fn(name: &str, args: Vec<Expr>) -> Expr {
    Expr::UnresolvedFunction {
        name: name.to_string(),
        args,
        distinct: false,
    }
}

fn named(e: Expr) -> Expr {
    Expr::UnresolvedAlias { child: Box::new(e) }
}

// --- scenario seeds ---------------------------------------------------------

#[test]
fn cte_inlines_into_nested_projects() {
    let cte_body = LogicalPlan::project(
        vec![Expr::int(1).alias("a")],
        LogicalPlan::LocalRelation { output: vec![] },
    );
    let plan = LogicalPlan::With {
        input: Box::new(LogicalPlan::project(vec![Expr::col("a")], table("x"))),
        ctes: vec![("x".to_string(), cte_body)],
    };

    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected outer project");
    };
    let Expr::Attribute(outer_ref) = &list[0] else {
        panic!("expected attribute, got {:?}", list[0]);
    };
    assert_eq!(outer_ref.name, "a");
    let LogicalPlan::Project { list, input } = *input else {
        panic!("expected inner project");
    };
    let Expr::Alias { name, id, .. } = &list[0] else {
        panic!("expected alias, got {:?}", list[0]);
    };
    assert_eq!(name, "a");
    assert_eq!(*id, outer_ref.id, "reference binds to the CTE alias");
    assert!(matches!(*input, LogicalPlan::LocalRelation { .. }));
}

#[test]
fn having_condition_is_pushed_into_the_aggregate() {
    let agg = LogicalPlan::Aggregate {
        grouping: vec![Expr::col("a")],
        aggregates: vec![
            Expr::col("a"),
            named(unresolved_fn("sum", vec![Expr::col("b")])),
        ],
        input: Box::new(table("t")),
    };
    let plan = LogicalPlan::filter(
        Expr::binary(
            unresolved_fn("sum", vec![Expr::col("b")]),
            flint_analyzer::BinaryOp::Gt,
            Expr::int(0),
        ),
        agg,
    );

    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected stripping projection");
    };
    assert_eq!(list.len(), 2, "original output is restored");
    let LogicalPlan::Filter { condition, input } = *input else {
        panic!("expected filter");
    };
    let LogicalPlan::Aggregate { aggregates, .. } = *input else {
        panic!("expected aggregate");
    };
    assert_eq!(aggregates.len(), 3, "condition aggregate is pushed down");
    let pushed = aggregates[2].to_attribute().expect("pushed alias is named");
    assert!(
        condition.references().contains_id(pushed.id),
        "filter references the pushed aggregate column"
    );
}

#[test]
fn window_expression_moves_into_window_operator() {
    let window = Expr::WindowExpression {
        function: Box::new(unresolved_fn("sum", vec![Expr::col("b")])),
        spec: WindowSpec {
            partition_by: vec![Expr::col("a")],
            order_by: vec![],
            frame: None,
        },
    };
    let plan = LogicalPlan::project(vec![Expr::col("a"), named(window)], table("t"));

    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected final projection");
    };
    assert_eq!(list.len(), 2);
    let LogicalPlan::Window {
        window_exprs,
        partition_by,
        order_by,
        input,
    } = *input
    else {
        panic!("expected window operator");
    };
    assert_eq!(window_exprs.len(), 1);
    assert_eq!(partition_by.len(), 1);
    assert!(order_by.is_empty());
    let Expr::Alias { child, .. } = &window_exprs[0] else {
        panic!("window expression is named");
    };
    let Expr::WindowExpression { function, spec } = child.as_ref() else {
        panic!("expected window expression");
    };
    assert!(matches!(
        function.as_ref(),
        Expr::AggregateExpression { .. }
    ));
    let frame = spec.frame.expect("default frame filled in");
    assert_eq!(frame.units, WindowFrameUnits::Rows);
    assert_eq!(frame.start, WindowFrameBound::UnboundedPreceding);
    assert_eq!(frame.end, WindowFrameBound::UnboundedFollowing);
    let LogicalPlan::Project { list, .. } = *input else {
        panic!("expected projection below the window");
    };
    assert_eq!(list.len(), 2, "partition and aggregate inputs are lifted");
}

#[test]
fn self_join_gets_disjoint_attribute_ids() {
    let plan = LogicalPlan::Join {
        left: Box::new(table("t")),
        right: Box::new(table("t")),
        join_type: flint_analyzer::JoinType::Inner,
        condition: None,
    };
    let analyzed = analyze(plan);
    let LogicalPlan::Join { left, right, .. } = analyzed else {
        panic!("expected join");
    };
    assert!(
        left.output_set().intersect(&right.output_set()).is_empty(),
        "join sides share no attribute ids"
    );
    assert_eq!(
        left.output().iter().map(|a| &a.name).collect::<Vec<_>>(),
        right.output().iter().map(|a| &a.name).collect::<Vec<_>>(),
    );
}

#[test]
fn order_by_unselected_column_lifts_and_strips_it() {
    let plan = LogicalPlan::Sort {
        order: vec![SortOrder::asc(Expr::col("b"))],
        global: true,
        input: Box::new(LogicalPlan::project(vec![Expr::col("a")], table("t"))),
    };
    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected stripping projection");
    };
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name().as_deref(), Some("a"));
    let LogicalPlan::Sort { order, input, .. } = *input else {
        panic!("expected sort");
    };
    assert!(order[0].expr.resolved());
    let LogicalPlan::Project { list, .. } = *input else {
        panic!("expected widened projection");
    };
    assert_eq!(list.len(), 2, "missing column is lifted below the sort");
}

#[test]
fn cube_desugars_into_expand_and_aggregate() {
    let plan = LogicalPlan::Aggregate {
        grouping: vec![Expr::Cube {
            exprs: vec![Expr::col("a"), Expr::col("b")],
        }],
        aggregates: vec![
            Expr::col("a"),
            Expr::col("b"),
            named(unresolved_fn("sum", vec![Expr::col("c")])),
        ],
        input: Box::new(table("t")),
    };
    let analyzed = analyze(plan);
    let LogicalPlan::Aggregate {
        grouping,
        aggregates,
        input,
    } = analyzed
    else {
        panic!("expected aggregate");
    };
    assert_eq!(grouping.len(), 3, "a', b', grouping_id");
    assert_eq!(aggregates.len(), 3);
    let LogicalPlan::Expand {
        projections,
        output,
        ..
    } = *input
    else {
        panic!("expected expand");
    };
    assert_eq!(projections.len(), 4, "cube over two columns has 4 masks");
    // child columns (3) + grouping columns (2) + grouping id
    assert_eq!(output.len(), 6);
    assert_eq!(output[5].name, "grouping_id");
    // The a/b output columns are the Expand-produced ones, not the base
    // relation's.
    let rewritten_a = aggregates[0].to_attribute().expect("named");
    assert_eq!(rewritten_a.id, output[3].id);
}

// --- ordinals ---------------------------------------------------------------

#[test]
fn order_by_ordinal_binds_to_select_position() {
    let plan = LogicalPlan::Sort {
        order: vec![SortOrder::asc(Expr::int(1))],
        global: true,
        input: Box::new(LogicalPlan::project(
            vec![Expr::col("a"), Expr::col("b")],
            table("t"),
        )),
    };
    let analyzed = analyze(plan);
    let LogicalPlan::Sort { order, input, .. } = analyzed else {
        panic!("expected sort");
    };
    let Expr::Attribute(bound) = &order[0].expr else {
        panic!("ordinal bound to attribute");
    };
    assert_eq!(bound.name, "a");
    assert_eq!(bound.id, input.output()[0].id);
}

#[test]
fn out_of_range_ordinal_fails() {
    let plan = LogicalPlan::Sort {
        order: vec![SortOrder::asc(Expr::int(5))],
        global: true,
        input: Box::new(LogicalPlan::project(vec![Expr::col("a")], table("t"))),
    };
    let err = analyze_err(plan);
    assert!(err.contains("ORDER BY position 5"), "{err}");
}

#[test]
fn group_by_ordinal_rejects_aggregate_positions() {
    let plan = LogicalPlan::Aggregate {
        grouping: vec![Expr::int(1)],
        aggregates: vec![named(unresolved_fn("sum", vec![Expr::col("b")]))],
        input: Box::new(table("t")),
    };
    let err = analyze_err(plan);
    assert!(
        err.contains("GROUP BY position 1 is an aggregate function"),
        "{err}"
    );
}

// --- stars ------------------------------------------------------------------

#[test]
fn star_expands_to_child_output() {
    let plan = LogicalPlan::project(vec![Expr::Star { qualifier: None }], table("t"));
    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, .. } = analyzed else {
        panic!("expected project");
    };
    let names: Vec<String> = list.iter().filter_map(|e| e.name()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn count_star_resolves() {
    let plan = LogicalPlan::project(
        vec![named(unresolved_fn(
            "count",
            vec![Expr::Star { qualifier: None }],
        ))],
        table("t"),
    );
    let analyzed = analyze(plan);
    let LogicalPlan::Aggregate { aggregates, .. } = analyzed else {
        panic!("global aggregate expected");
    };
    assert!(aggregates[0].resolved());
}

#[test]
fn star_outside_allowed_contexts_fails() {
    let plan = LogicalPlan::project(
        vec![named(Expr::binary(
            Expr::col("a"),
            flint_analyzer::BinaryOp::Plus,
            Expr::Star { qualifier: None },
        ))],
        table("t"),
    );
    let err = analyze_err(plan);
    assert!(err.contains("Invalid usage of '*'"), "{err}");
}

// --- generators -------------------------------------------------------------

#[test]
fn explode_relocates_into_generate() {
    let plan = LogicalPlan::project(
        vec![named(unresolved_fn("explode", vec![Expr::col("xs")]))],
        table("arrs"),
    );
    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected project");
    };
    assert_eq!(list.len(), 1);
    let LogicalPlan::Generate {
        generator,
        join,
        generator_output,
        ..
    } = *input
    else {
        panic!("expected generate");
    };
    assert!(matches!(generator, Expr::Generator { .. }));
    assert!(!join, "single-item select list does not join");
    assert_eq!(generator_output.len(), 1);
    assert_eq!(generator_output[0].name, "col");
}

#[test]
fn two_generators_in_one_select_fail() {
    let plan = LogicalPlan::project(
        vec![
            named(unresolved_fn("explode", vec![Expr::col("xs")])),
            named(unresolved_fn("explode", vec![Expr::col("xs")])),
        ],
        table("arrs"),
    );
    let err = analyze_err(plan);
    assert!(err.contains("Only one generator allowed"), "{err}");
}

#[test]
fn generator_alias_arity_mismatch_fails() {
    let plan = LogicalPlan::project(
        vec![Expr::MultiAlias {
            child: Box::new(unresolved_fn("explode", vec![Expr::col("xs")])),
            names: vec!["p".to_string(), "q".to_string()],
        }],
        table("arrs"),
    );
    let err = analyze_err(plan);
    assert!(err.contains("number of aliases"), "{err}");
}

// --- errors -----------------------------------------------------------------

#[test]
fn unknown_table_fails_with_context() {
    let err = analyze_err(LogicalPlan::project(vec![Expr::col("a")], table("missing")));
    assert!(err.contains("Table or view not found: missing"), "{err}");
}

#[test]
fn unknown_column_fails_with_candidates() {
    let err = analyze_err(LogicalPlan::project(vec![Expr::col("nope")], table("t")));
    assert!(err.contains("cannot resolve 'nope'"), "{err}");
    assert!(err.contains("t.a"), "{err}");
}

#[test]
fn ambiguous_column_lists_candidates() {
    let join = LogicalPlan::Join {
        left: Box::new(table("t")),
        right: Box::new(table("u")),
        join_type: flint_analyzer::JoinType::Inner,
        condition: None,
    };
    let err = analyze_err(LogicalPlan::project(vec![Expr::col("a")], join));
    assert!(err.contains("ambiguous"), "{err}");
    assert!(err.contains("t.a") && err.contains("u.a"), "{err}");
}

#[test]
fn rank_without_order_fails() {
    let window = Expr::WindowExpression {
        function: Box::new(unresolved_fn("rank", vec![])),
        spec: WindowSpec {
            partition_by: vec![Expr::col("a")],
            order_by: vec![],
            frame: None,
        },
    };
    let err = analyze_err(LogicalPlan::project(vec![named(window)], table("t")));
    assert!(err.contains("requires window to be ordered"), "{err}");
}

#[test]
fn rank_gets_order_keys_injected() {
    let window = Expr::WindowExpression {
        function: Box::new(unresolved_fn("rank", vec![])),
        spec: WindowSpec {
            partition_by: vec![],
            order_by: vec![SortOrder::asc(Expr::col("b"))],
            frame: None,
        },
    };
    let analyzed = analyze(LogicalPlan::project(
        vec![Expr::col("a"), named(window)],
        table("t"),
    ));
    let mut found_rank_args = None;
    analyzed
        .foreach_up(&mut |node| {
            if let LogicalPlan::Window { window_exprs, .. } = node {
                window_exprs[0].visit(&mut |e| {
                    if let Expr::WindowFunction { args, .. } = e {
                        found_rank_args = Some(args.len());
                    }
                });
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(found_rank_args, Some(1), "order key injected into rank");
}

#[test]
fn undefined_window_name_fails() {
    let mut definitions = std::collections::HashMap::new();
    definitions.insert(
        "w".to_string(),
        WindowSpec {
            partition_by: vec![Expr::col("a")],
            order_by: vec![],
            frame: None,
        },
    );
    let plan = LogicalPlan::WithWindowDefinition {
        definitions,
        input: Box::new(LogicalPlan::project(
            vec![named(Expr::UnresolvedWindowExpression {
                child: Box::new(unresolved_fn("sum", vec![Expr::col("b")])),
                name: "w2".to_string(),
            })],
            table("t"),
        )),
    };
    let err = analyze_err(plan);
    assert!(err.contains("Window specification w2 is not defined"), "{err}");
}

#[test]
fn where_clause_rejects_aggregates() {
    let plan = LogicalPlan::filter(
        Expr::binary(
            unresolved_fn("sum", vec![Expr::col("b")]),
            flint_analyzer::BinaryOp::Gt,
            Expr::int(0),
        ),
        table("t"),
    );
    let err = analyze_err(plan);
    assert!(err.contains("aggregate"), "{err}");
}

#[test]
fn sort_over_aggregate_requires_grouped_column() {
    let plan = LogicalPlan::Sort {
        order: vec![SortOrder::asc(Expr::col("b"))],
        global: true,
        input: Box::new(LogicalPlan::Aggregate {
            grouping: vec![Expr::col("a")],
            aggregates: vec![Expr::col("a")],
            input: Box::new(table("t")),
        }),
    };
    let err = analyze_err(plan);
    assert!(err.contains("neither present in the group by"), "{err}");
}

// --- subqueries -------------------------------------------------------------

#[test]
fn correlated_exists_binds_to_outer_scope() {
    let sub = LogicalPlan::filter(
        Expr::eq(Expr::col("x"), Expr::qualified_col("t", "a")),
        table("v"),
    );
    let plan = LogicalPlan::filter(
        Expr::Exists {
            plan: Box::new(sub),
        },
        table("t"),
    );
    let analyzed = analyze(plan);
    let LogicalPlan::Filter { condition, input } = analyzed else {
        panic!("expected filter");
    };
    let outer_a = input.output()[0].clone();
    let Expr::Exists { plan: sub } = condition else {
        panic!("expected exists");
    };
    assert!(sub.resolved());
    let LogicalPlan::Filter { condition, .. } = *sub else {
        panic!("expected inner filter");
    };
    assert!(
        condition.references().contains_id(outer_a.id),
        "inner condition references the outer column"
    );
}

#[test]
fn conflicting_outer_reference_is_aliased_and_stripped() {
    // The subquery scans the same base table as the outer query, so the
    // correlated column must be renamed to stay unambiguous.
    let sub = LogicalPlan::filter(
        Expr::eq(Expr::col("b"), Expr::qualified_col("o", "a")),
        table("t"),
    );
    let plan = LogicalPlan::filter(
        Expr::Exists {
            plan: Box::new(sub),
        },
        LogicalPlan::SubqueryAlias {
            alias: "o".to_string(),
            input: Box::new(table("t")),
        },
    );
    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected stripping projection");
    };
    assert_eq!(list.len(), 3, "outer output is restored");
    let LogicalPlan::Filter { input, .. } = *input else {
        panic!("expected filter");
    };
    let LogicalPlan::Project { list, .. } = *input else {
        panic!("expected materializing projection");
    };
    assert_eq!(list.len(), 4, "renamed outer column is materialized");
}

// --- time windows -----------------------------------------------------------

#[test]
fn time_window_desugars_into_expand_and_filter() {
    let window = Expr::TimeWindow {
        time_column: Box::new(Expr::col("ts")),
        window_duration: 10_000_000,
        slide_duration: 5_000_000,
        start_time: 0,
    };
    let plan = LogicalPlan::project(vec![named(window)], table("events"));
    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected project");
    };
    assert_eq!(list[0].name().as_deref(), Some("window"));
    let LogicalPlan::Filter { input, .. } = *input else {
        panic!("expected window membership filter");
    };
    let LogicalPlan::Expand { projections, .. } = *input else {
        panic!("expected expand");
    };
    assert_eq!(projections.len(), 3, "ceil(window / slide) + 1 projections");
}

#[test]
fn slide_boundary_timestamp_keeps_its_window() {
    // Tumbling window (window == slide): a timestamp exactly on the slide
    // boundary belongs to [10, 20), which only the last projection emits;
    // every earlier window ends at the timestamp and excludes it.
    let window = Expr::TimeWindow {
        time_column: Box::new(Expr::col("ts")),
        window_duration: 10,
        slide_duration: 10,
        start_time: 0,
    };
    let plan = LogicalPlan::project(vec![named(window)], table("events"));
    let analyzed = analyze(plan);

    let mut projections = None;
    analyzed
        .foreach_up(&mut |node| {
            if let LogicalPlan::Expand { projections: p, .. } = node {
                projections = Some(p.clone());
            }
            Ok(())
        })
        .unwrap();
    let projections = projections.expect("expand operator");
    assert_eq!(projections.len(), 2, "tumbling window emits i = 0 and i = 1");

    let ts = 10.0;
    let covering: Vec<(f64, f64)> = projections
        .iter()
        .map(|row| {
            let Expr::CreateStruct { children } = &row[0] else {
                panic!("window struct leads each projection, got {:?}", row[0]);
            };
            (
                eval_window_bound(&children[0], ts),
                eval_window_bound(&children[1], ts),
            )
        })
        .filter(|(start, end)| *start <= ts && ts < *end)
        .collect();
    assert_eq!(
        covering,
        vec![(10.0, 20.0)],
        "the boundary row maps to exactly one window"
    );
}

/// Fold a window start/end expression for a given timestamp value.
fn eval_window_bound(e: &Expr, ts: f64) -> f64 {
    match e {
        Expr::Literal {
            value: LiteralValue::Int64(v),
            ..
        } => *v as f64,
        Expr::Literal {
            value: LiteralValue::Float64(v),
            ..
        } => *v,
        Expr::Attribute(_) => ts,
        Expr::Alias { child, .. } => eval_window_bound(child, ts),
        Expr::Cast { expr, .. } => eval_window_bound(expr, ts),
        Expr::ScalarFunction { name, args, .. } if name == "ceil" => {
            eval_window_bound(&args[0], ts).ceil()
        }
        Expr::BinaryOp { left, op, right } => {
            let l = eval_window_bound(left, ts);
            let r = eval_window_bound(right, ts);
            match op {
                flint_analyzer::BinaryOp::Plus => l + r,
                flint_analyzer::BinaryOp::Minus => l - r,
                flint_analyzer::BinaryOp::Multiply => l * r,
                flint_analyzer::BinaryOp::Divide => l / r,
                other => panic!("unexpected operator {other:?} in window bound"),
            }
        }
        other => panic!("unexpected expression {other:?} in window bound"),
    }
}

#[test]
fn two_time_windows_in_one_operator_fail() {
    let mk = |slide: i64| Expr::TimeWindow {
        time_column: Box::new(Expr::col("ts")),
        window_duration: 10_000_000,
        slide_duration: slide,
        start_time: 0,
    };
    let plan = LogicalPlan::project(
        vec![named(mk(5_000_000)), named(mk(2_000_000))],
        table("events"),
    );
    let err = analyze_err(plan);
    assert!(err.contains("Multiple time window expressions"), "{err}");
}

// --- UDFs -------------------------------------------------------------------

#[test]
fn primitive_udf_parameters_get_null_guards() {
    let mut cat = catalog();
    cat.register_udf(UdfDef {
        name: "plus_one".to_string(),
        param_types: vec![DataType::Int64],
        return_type: DataType::Int64,
        primitive_params: vec![true],
        deterministic: true,
    });
    let analyzer = Analyzer::new(Arc::new(cat), AnalyzerConfig::default());
    let plan = LogicalPlan::project(
        vec![named(unresolved_fn("plus_one", vec![Expr::col("b")]))],
        table("t"),
    );
    let analyzed = analyzer.analyze(plan).expect("analysis succeeds");
    let LogicalPlan::Project { list, .. } = analyzed else {
        panic!("expected project");
    };
    let Expr::Alias { child, .. } = &list[0] else {
        panic!("expected aliased output");
    };
    let Expr::If {
        condition,
        else_expr,
        ..
    } = child.as_ref()
    else {
        panic!("expected null guard, got {child:?}");
    };
    assert!(matches!(condition.as_ref(), Expr::IsNull(_)));
    assert!(matches!(
        else_expr.as_ref(),
        Expr::ScalarUdf { null_safe: true, .. }
    ));
}

// --- properties -------------------------------------------------------------

#[test]
fn analysis_is_idempotent() {
    let seeds = vec![
        LogicalPlan::project(vec![Expr::Star { qualifier: None }], table("t")),
        LogicalPlan::filter(
            Expr::binary(
                unresolved_fn("sum", vec![Expr::col("b")]),
                flint_analyzer::BinaryOp::Gt,
                Expr::int(0),
            ),
            LogicalPlan::Aggregate {
                grouping: vec![Expr::col("a")],
                aggregates: vec![
                    Expr::col("a"),
                    named(unresolved_fn("sum", vec![Expr::col("b")])),
                ],
                input: Box::new(table("t")),
            },
        ),
        LogicalPlan::Sort {
            order: vec![SortOrder::asc(Expr::col("b"))],
            global: true,
            input: Box::new(LogicalPlan::project(vec![Expr::col("a")], table("t"))),
        },
    ];
    for seed in seeds {
        let once = analyze(seed);
        let twice = analyze(once.clone());
        assert_eq!(once, twice, "re-analysis changes the plan");
    }
}

#[test]
fn no_unresolved_nodes_survive() {
    let analyzed = analyze(LogicalPlan::Aggregate {
        grouping: vec![Expr::col("a")],
        aggregates: vec![
            Expr::col("a"),
            named(unresolved_fn("sum", vec![Expr::col("b")])),
        ],
        input: Box::new(LogicalPlan::project(
            vec![Expr::Star { qualifier: None }],
            table("t"),
        )),
    });
    analyzed
        .foreach_up(&mut |node| {
            assert!(node.resolved(), "unresolved node: {}", node.node_name());
            for e in node.expressions() {
                assert!(e.resolved(), "unresolved expression survived analysis");
                e.data_type().expect("every expression is typed");
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn output_attribute_ids_are_unique_per_site() {
    let join = LogicalPlan::Join {
        left: Box::new(table("t")),
        right: Box::new(LogicalPlan::Join {
            left: Box::new(table("t")),
            right: Box::new(table("u")),
            join_type: flint_analyzer::JoinType::Inner,
            condition: None,
        }),
        join_type: flint_analyzer::JoinType::Inner,
        condition: None,
    };
    let analyzed = analyze(join);
    let mut seen: Vec<AttributeRef> = vec![];
    analyzed
        .foreach_up(&mut |node| {
            if let LogicalPlan::Relation { output, .. } = node {
                for a in output {
                    assert!(
                        !seen.iter().any(|s| s.id == a.id),
                        "attribute id produced twice"
                    );
                    seen.push(a.clone());
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn deterministic_modulo_ids() {
    let seed = || {
        LogicalPlan::Aggregate {
            grouping: vec![Expr::col("a")],
            aggregates: vec![
                Expr::col("a"),
                named(unresolved_fn("sum", vec![Expr::col("b")])),
            ],
            input: Box::new(table("t")),
        }
    };
    let one = analyze(seed());
    let two = analyze(seed());
    // Same catalog attribute ids, fresh alias ids: compare rendered shape
    // with ids stripped.
    let strip = |s: String| -> String {
        s.chars().filter(|c| !c.is_ascii_digit()).collect()
    };
    assert_eq!(
        strip(flint_analyzer::explain_logical(&one)),
        strip(flint_analyzer::explain_logical(&two)),
    );
}

#[test]
fn union_width_mismatch_fails() {
    let plan = LogicalPlan::Union {
        inputs: vec![
            LogicalPlan::project(vec![Expr::col("a")], table("t")),
            LogicalPlan::project(vec![Expr::col("x"), Expr::col("y")], table("v")),
        ],
    };
    let err = analyze_err(plan);
    assert!(err.contains("same number of columns"), "{err}");
}

#[test]
fn single_child_union_is_eliminated() {
    let plan = LogicalPlan::Union {
        inputs: vec![LogicalPlan::project(vec![Expr::col("a")], table("t"))],
    };
    let analyzed = analyze(plan);
    assert!(matches!(analyzed, LogicalPlan::Project { .. }));
}

#[test]
fn insert_target_loses_subquery_alias() {
    let plan = LogicalPlan::InsertIntoTable {
        table: Box::new(LogicalPlan::UnresolvedRelation {
            table: TableId::bare("u"),
            alias: Some("renamed".to_string()),
        }),
        input: Box::new(LogicalPlan::project(
            vec![Expr::col("a"), Expr::col("b")],
            table("t"),
        )),
        overwrite: false,
    };
    let analyzed = analyze(plan);
    let LogicalPlan::InsertIntoTable { table, .. } = analyzed else {
        panic!("expected insert");
    };
    assert!(matches!(*table, LogicalPlan::Relation { .. }));
}

#[test]
fn pivot_desugars_to_masked_aggregates() {
    let plan = LogicalPlan::Pivot {
        group_by: vec![Expr::col("a")],
        pivot_column: Expr::col("b"),
        pivot_values: vec![LiteralValue::Int64(1), LiteralValue::Int64(2)],
        aggregates: vec![unresolved_fn("sum", vec![Expr::col("c")])],
        input: Box::new(table("t")),
    };
    let analyzed = analyze(plan);
    let LogicalPlan::Aggregate {
        grouping,
        aggregates,
        ..
    } = analyzed
    else {
        panic!("expected aggregate");
    };
    assert_eq!(grouping.len(), 1);
    assert_eq!(aggregates.len(), 3, "group column + one column per value");
    assert_eq!(aggregates[1].name().as_deref(), Some("1"));
    assert_eq!(aggregates[2].name().as_deref(), Some("2"));
    // The masked aggregate evaluates its argument only for matching rows.
    let mut saw_if = false;
    aggregates[1].visit(&mut |e| {
        if matches!(e, Expr::If { .. }) {
            saw_if = true;
        }
    });
    assert!(saw_if, "pivot argument is masked with if()");
}

#[test]
fn pivot_requires_an_aggregate() {
    let plan = LogicalPlan::Pivot {
        group_by: vec![Expr::col("a")],
        pivot_column: Expr::col("b"),
        pivot_values: vec![LiteralValue::Int64(1)],
        aggregates: vec![Expr::col("c")],
        input: Box::new(table("t")),
    };
    let err = analyze_err(plan);
    assert!(err.contains("Aggregate expression required for pivot"), "{err}");
}

#[test]
fn grouping_function_outside_grouping_sets_fails() {
    let plan = LogicalPlan::Aggregate {
        grouping: vec![Expr::col("a")],
        aggregates: vec![named(unresolved_fn("grouping", vec![Expr::col("a")]))],
        input: Box::new(table("t")),
    };
    let err = analyze_err(plan);
    assert!(err.contains("GroupingSets/Cube/Rollup"), "{err}");
}

#[test]
fn rollup_produces_prefix_masks() {
    let plan = LogicalPlan::Aggregate {
        grouping: vec![Expr::Rollup {
            exprs: vec![Expr::col("a"), Expr::col("b")],
        }],
        aggregates: vec![
            Expr::col("a"),
            Expr::col("b"),
            named(unresolved_fn("count", vec![Expr::col("c")])),
        ],
        input: Box::new(table("t")),
    };
    let analyzed = analyze(plan);
    let mut mask_count = None;
    analyzed
        .foreach_up(&mut |node| {
            if let LogicalPlan::Expand { projections, .. } = node {
                mask_count = Some(projections.len());
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(mask_count, Some(3), "rollup over two columns has 3 sets");
}

#[test]
fn nondeterministic_sort_keys_are_pulled_into_a_projection() {
    let plan = LogicalPlan::Sort {
        order: vec![SortOrder::asc(unresolved_fn("rand", vec![]))],
        global: true,
        input: Box::new(LogicalPlan::project(vec![Expr::col("a")], table("t"))),
    };
    let analyzed = analyze(plan);
    let LogicalPlan::Project { list, input } = analyzed else {
        panic!("expected stripping projection");
    };
    assert_eq!(list.len(), 1);
    let LogicalPlan::Sort { order, input, .. } = *input else {
        panic!("expected sort");
    };
    assert!(matches!(order[0].expr, Expr::Attribute(_)));
    let LogicalPlan::Project { list, .. } = *input else {
        panic!("expected projection computing rand()");
    };
    assert_eq!(list.len(), 2);
    assert!(list[1].name().as_deref() == Some("_nondeterministic"));
}

#[test]
fn alias_id_reminting_does_not_block_convergence() {
    use flint_analyzer::executor::AnalyzerRule;
    use flint_common::ExprId;
    struct Remint;
    impl AnalyzerRule for Remint {
        fn name(&self) -> &str {
            "test-remint"
        }
        fn rewrite(
            &self,
            plan: LogicalPlan,
            _ctx: &flint_analyzer::AnalyzerContext<'_>,
        ) -> flint_common::Result<LogicalPlan> {
            plan.transform_expressions_up(&mut |e| match e {
                Expr::Alias { child, name, .. } => Ok(Expr::Alias {
                    child,
                    name,
                    id: ExprId::fresh(),
                }),
                other => Ok(other),
            })
        }
    }

    // The rule changes every alias id on every pass; convergence is judged
    // structurally, so analysis still terminates well under the cap.
    let config = AnalyzerConfig {
        max_iterations: 5,
        ..AnalyzerConfig::default()
    };
    let analyzer =
        Analyzer::new(Arc::new(catalog()), config).with_extended_rules(vec![Arc::new(Remint)]);
    let plan = LogicalPlan::project(vec![Expr::int(1).alias("one")], table("t"));
    let analyzed = analyzer.analyze(plan).expect("id-only rewrites converge");
    assert_eq!(analyzed.output()[0].name, "one");
}

#[test]
fn convergence_failure_reports_the_batch() {
    use flint_analyzer::executor::AnalyzerRule;
    struct Pump;
    impl AnalyzerRule for Pump {
        fn name(&self) -> &str {
            "test-pump"
        }
        fn rewrite(
            &self,
            plan: LogicalPlan,
            _ctx: &flint_analyzer::AnalyzerContext<'_>,
        ) -> flint_common::Result<LogicalPlan> {
            plan.transform_expressions_up(&mut |e| match e {
                Expr::Literal {
                    value: LiteralValue::Int64(v),
                    data_type,
                } => Ok(Expr::Literal {
                    value: LiteralValue::Int64(v + 1),
                    data_type,
                }),
                other => Ok(other),
            })
        }
    }

    let config = AnalyzerConfig {
        max_iterations: 5,
        ..AnalyzerConfig::default()
    };
    let analyzer = Analyzer::new(Arc::new(catalog()), config)
        .with_extended_rules(vec![Arc::new(Pump)]);
    let plan = LogicalPlan::filter(
        Expr::binary(Expr::col("a"), flint_analyzer::BinaryOp::Gt, Expr::int(0)),
        table("t"),
    );
    let err = analyzer.analyze(plan).expect_err("must not converge");
    match err {
        FlintError::Analysis(msg) => {
            assert!(msg.contains("Max iterations (5) reached"), "{msg}");
            assert!(msg.contains("Resolution"), "{msg}");
        }
        other => panic!("expected analysis error, got {other:?}"),
    }
}
