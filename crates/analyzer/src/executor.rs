use std::sync::Arc;

use flint_common::{FlintError, Result};

use crate::analyzer::AnalyzerContext;
use crate::logical_plan::LogicalPlan;

/// A plan-to-plan rewrite applied by the analyzer.
///
/// Rules must be safe to re-apply: within a fixed-point batch a rule sees its
/// own output from previous iterations.
pub trait AnalyzerRule: Send + Sync {
    /// Human-readable rule name used in diagnostics and logs.
    fn name(&self) -> &str;

    /// Rewrite `plan` once.
    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan>;
}

/// How often a batch re-runs its rules.
#[derive(Debug, Clone, Copy)]
pub enum Strategy {
    /// One full pass over the rule list.
    Once,
    /// Re-run passes until a pass changes nothing, capped at the given count.
    FixedPoint(usize),
}

/// A named, ordered list of rules with a convergence policy.
pub struct Batch {
    pub name: &'static str,
    pub strategy: Strategy,
    pub rules: Vec<Arc<dyn AnalyzerRule>>,
}

impl Batch {
    pub fn once(name: &'static str, rules: Vec<Arc<dyn AnalyzerRule>>) -> Self {
        Self {
            name,
            strategy: Strategy::Once,
            rules,
        }
    }

    pub fn fixed_point(
        name: &'static str,
        max_iterations: usize,
        rules: Vec<Arc<dyn AnalyzerRule>>,
    ) -> Self {
        Self {
            name,
            strategy: Strategy::FixedPoint(max_iterations),
            rules,
        }
    }
}

/// Drive every batch over the plan in order.
///
/// A pass is a no-op when every rule returned a plan identical to or
/// structurally equal to its input. Structural equality is judged on
/// canonicalized plans, never on expression ids: a rule that merely
/// re-mints alias ids has not changed the plan and must not keep a
/// fixed-point batch spinning.
pub fn execute_batches(
    batches: &[Batch],
    mut plan: LogicalPlan,
    ctx: &AnalyzerContext<'_>,
) -> Result<LogicalPlan> {
    for batch in batches {
        let max_iterations = match batch.strategy {
            Strategy::Once => 1,
            Strategy::FixedPoint(n) => n,
        };
        let mut iteration = 0;
        loop {
            iteration += 1;
            let mut changed = false;
            for rule in &batch.rules {
                let before = plan.clone();
                plan = rule.rewrite(plan, ctx)?;
                if plan != before && plan.canonicalized() != before.canonicalized() {
                    changed = true;
                    tracing::debug!(
                        batch = batch.name,
                        rule = rule.name(),
                        iteration,
                        "rule produced a new plan"
                    );
                }
            }
            if !changed {
                break;
            }
            if iteration >= max_iterations {
                if matches!(batch.strategy, Strategy::FixedPoint(_)) {
                    tracing::warn!(
                        batch = batch.name,
                        max_iterations,
                        "batch did not reach a fixed point"
                    );
                    return Err(FlintError::analysis(format!(
                        "Max iterations ({max_iterations}) reached for batch {}",
                        batch.name
                    )));
                }
                break;
            }
        }
    }
    Ok(plan)
}
