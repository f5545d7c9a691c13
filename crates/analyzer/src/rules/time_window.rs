use arrow_schema::{DataType, TimeUnit};
use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::executor::AnalyzerRule;
use crate::expr::{time_window_type, AttributeRef, BinaryOp, Expr, LiteralValue};
use crate::logical_plan::LogicalPlan;

/// Desugar tumbling/sliding time windows into an `Expand` that emits one row
/// per overlapping window plus a `Filter` keeping the windows that actually
/// contain the row's timestamp.
pub struct TimeWindowing;

impl AnalyzerRule for TimeWindowing {
    fn name(&self) -> &str {
        "time-windowing"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.transform_up(&mut |p| {
            if p.children().len() != 1 || !p.children_resolved() {
                return Ok(p);
            }
            let mut windows: Vec<Expr> = Vec::new();
            for e in p.expressions() {
                e.visit(&mut |x| {
                    if matches!(x, Expr::TimeWindow { .. }) && !windows.contains(x) {
                        windows.push(x.clone());
                    }
                });
            }
            if windows.is_empty() {
                return Ok(p);
            }
            if windows.len() > 1 {
                return Err(FlintError::analysis(
                    "Multiple time window expressions would result in a cartesian product of \
                     rows, therefore they are currently not supported.",
                ));
            }
            let window = windows.remove(0);
            let Expr::TimeWindow {
                ref time_column,
                window_duration,
                slide_duration,
                start_time,
            } = window
            else {
                unreachable!()
            };
            if !time_column.resolved() {
                return Ok(p);
            }
            if slide_duration <= 0 || window_duration <= 0 {
                return Err(FlintError::analysis(
                    "The window duration and slide duration must be positive",
                ));
            }

            let window_attr = AttributeRef::new("window", time_window_type(), false);
            let max_overlapping = (window_duration + slide_duration - 1) / slide_duration;

            let child = p.children()[0].clone();
            let child_output = child.output();

            // windowId = ceil((ts - startTime) / slideDuration), over
            // microsecond timestamps viewed as integers.
            let ts = Expr::Cast {
                expr: time_column.clone(),
                to_type: DataType::Int64,
            };
            let elapsed = Expr::binary(ts, BinaryOp::Minus, Expr::int(start_time));
            let window_id = Expr::ScalarFunction {
                name: "ceil".to_string(),
                args: vec![Expr::binary(
                    elapsed.cast(DataType::Float64),
                    BinaryOp::Divide,
                    Expr::Literal {
                        value: LiteralValue::Float64(slide_duration as f64),
                        data_type: DataType::Float64,
                    },
                )],
                return_type: DataType::Int64,
            };

            let timestamp = DataType::Timestamp(TimeUnit::Microsecond, None);
            // Inclusive upper bound: the i = max_overlapping projection is
            // the one that covers timestamps landing exactly on a slide
            // boundary (for those, windowId already points one slide ahead).
            let projections: Vec<Vec<Expr>> = (0..=max_overlapping)
                .map(|i| {
                    let start_micros = Expr::binary(
                        Expr::binary(
                            Expr::binary(
                                Expr::binary(window_id.clone(), BinaryOp::Plus, Expr::int(i)),
                                BinaryOp::Minus,
                                Expr::int(max_overlapping),
                            ),
                            BinaryOp::Multiply,
                            Expr::int(slide_duration),
                        ),
                        BinaryOp::Plus,
                        Expr::int(start_time),
                    );
                    let end_micros =
                        Expr::binary(start_micros.clone(), BinaryOp::Plus, Expr::int(window_duration));
                    let window_struct = Expr::CreateStruct {
                        children: vec![
                            start_micros.cast(timestamp.clone()).alias("start"),
                            end_micros.cast(timestamp.clone()).alias("end"),
                        ],
                    };
                    let mut row = vec![window_struct];
                    row.extend(child_output.iter().cloned().map(Expr::Attribute));
                    row
                })
                .collect();

            let mut expand_output = vec![window_attr.clone()];
            expand_output.extend(child_output.iter().cloned());
            let expand = LogicalPlan::Expand {
                projections,
                output: expand_output,
                input: Box::new(child),
            };

            let window_ref = Expr::Attribute(window_attr.clone());
            let window_start = Expr::GetStructField {
                child: Box::new(window_ref.clone()),
                ordinal: 0,
                name: "start".to_string(),
            };
            let window_end = Expr::GetStructField {
                child: Box::new(window_ref),
                ordinal: 1,
                name: "end".to_string(),
            };
            let in_window = Expr::and(
                Expr::binary((**time_column).clone(), BinaryOp::GtEq, window_start),
                Expr::binary((**time_column).clone(), BinaryOp::Lt, window_end),
            );
            let filtered = LogicalPlan::filter(in_window, expand);

            // Substitute the window call by the produced column in place.
            let substituted = p.map_expressions(&mut |e| {
                e.transform_up(&mut |e| {
                    if e == window {
                        Ok(Expr::Attribute(window_attr.clone()))
                    } else {
                        Ok(e)
                    }
                })
            })?;
            substituted.with_new_child(filtered)
        })
    }
}
