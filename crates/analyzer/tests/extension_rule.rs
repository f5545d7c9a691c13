use std::sync::Arc;

use arrow_schema::DataType;
use flint_analyzer::{
    Analyzer, AnalyzerContext, AnalyzerRule, BinaryOp, Expr, LiteralValue, LogicalPlan,
    MemoryCatalog, TableId,
};
use flint_common::AnalyzerConfig;

struct GtToGte11Rule;

impl AnalyzerRule for GtToGte11Rule {
    fn name(&self) -> &str {
        "test_gt_to_gte_11"
    }

    fn rewrite(
        &self,
        plan: LogicalPlan,
        _ctx: &AnalyzerContext<'_>,
    ) -> flint_common::Result<LogicalPlan> {
        plan.transform_expressions_up(&mut |e| match e {
            Expr::BinaryOp {
                left,
                op: BinaryOp::Gt,
                right,
            } if matches!(
                *right,
                Expr::Literal {
                    value: LiteralValue::Int64(10),
                    ..
                }
            ) =>
            {
                Ok(Expr::BinaryOp {
                    left,
                    op: BinaryOp::GtEq,
                    right: Box::new(Expr::int(11)),
                })
            }
            other => Ok(other),
        })
    }
}

#[test]
fn custom_resolution_rule_runs_after_builtin_resolution() {
    let mut catalog = MemoryCatalog::new();
    catalog.register_table(
        "t",
        vec![("x", DataType::Int64, false), ("y", DataType::Int64, false)],
    );
    let analyzer = Analyzer::new(Arc::new(catalog), AnalyzerConfig::default())
        .with_extended_rules(vec![Arc::new(GtToGte11Rule)]);

    let plan = LogicalPlan::filter(
        Expr::binary(Expr::col("x"), BinaryOp::Gt, Expr::int(10)),
        LogicalPlan::UnresolvedRelation {
            table: TableId::bare("t"),
            alias: None,
        },
    );

    let analyzed = analyzer.analyze(plan).expect("analyze");
    match analyzed {
        LogicalPlan::Filter { condition, .. } => match condition {
            Expr::BinaryOp { left, op, right } => {
                assert_eq!(op, BinaryOp::GtEq);
                assert!(matches!(*left, Expr::Attribute(_)), "column is resolved");
                match *right {
                    Expr::Literal {
                        value: LiteralValue::Int64(v),
                        ..
                    } => assert_eq!(v, 11),
                    other => panic!("expected rewritten literal, got {other:?}"),
                }
            }
            other => panic!("expected binary predicate, got {other:?}"),
        },
        other => panic!("expected filter, got {other:?}"),
    }
}
