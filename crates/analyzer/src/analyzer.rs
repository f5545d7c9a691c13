use std::sync::Arc;

use flint_common::{AnalyzerConfig, FlintError, Result};

use crate::catalog::Catalog;
use crate::check::check_analysis;
use crate::executor::{execute_batches, AnalyzerRule, Batch};
use crate::logical_plan::LogicalPlan;
use crate::resolver::NameResolver;
use crate::rules;
use crate::type_coercion;

/// Logical-plan analyzer: binds every name, function, and structural
/// placeholder in an unresolved plan by fixed-point rule application.
///
/// Guarantees on success:
/// - no `Unresolved*` node remains and every expression carries a type;
/// - aggregate, generator, and window expressions sit in their canonical
///   operators;
/// - attribute ids are unique per producing site, so the same base relation
///   appearing twice yields disjoint columns.
///
/// All user-facing failures surface as [`FlintError::Analysis`].
pub struct Analyzer {
    catalog: Arc<dyn Catalog>,
    config: AnalyzerConfig,
    extended_rules: Vec<Arc<dyn AnalyzerRule>>,
}

/// Per-invocation context handed to every rule.
pub struct AnalyzerContext<'a> {
    pub analyzer: &'a Analyzer,
    pub catalog: &'a dyn Catalog,
    pub config: &'a AnalyzerConfig,
    pub resolver: NameResolver,
}

impl AnalyzerContext<'_> {
    /// Speculatively analyze a plan fragment, swallowing analysis
    /// diagnostics: the caller keeps its original tree when `None` comes
    /// back. Internal errors still propagate.
    pub fn try_execute(&self, plan: LogicalPlan) -> Result<Option<LogicalPlan>> {
        match self.analyzer.execute(plan) {
            Ok(p) => Ok(Some(p)),
            Err(
                FlintError::Analysis(_)
                | FlintError::NoSuchTable(_)
                | FlintError::NoSuchFunction(_),
            ) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Analyzer {
    pub fn new(catalog: Arc<dyn Catalog>, config: AnalyzerConfig) -> Self {
        Self {
            catalog,
            config,
            extended_rules: Vec::new(),
        }
    }

    /// Append caller-provided resolution rules. They run at the end of the
    /// Resolution batch, after type coercion.
    pub fn with_extended_rules(mut self, rules: Vec<Arc<dyn AnalyzerRule>>) -> Self {
        self.extended_rules = rules;
        self
    }

    /// Fully analyze a plan: run all batches, then assert every invariant.
    pub fn analyze(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let analyzed = self.execute(plan)?;
        check_analysis(&analyzed)?;
        Ok(analyzed)
    }

    /// Run the rule batches without the terminal validation pass. Rules use
    /// this for speculative, recursive resolution of plan fragments.
    pub(crate) fn execute(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let ctx = AnalyzerContext {
            analyzer: self,
            catalog: &*self.catalog,
            config: &self.config,
            resolver: NameResolver::from_config(&self.config),
        };
        execute_batches(&self.batches(), plan, &ctx)
    }

    /// The prescribed batch sequence. Rule order inside the Resolution batch
    /// is semantically significant; coercion and extension rules go last.
    fn batches(&self) -> Vec<Batch> {
        let max = self.config.max_iterations;

        let mut resolution: Vec<Arc<dyn AnalyzerRule>> = vec![
            Arc::new(rules::relations::ResolveRelations),
            Arc::new(rules::references::ResolveReferences),
            Arc::new(rules::udf::ResolveDeserializer),
            Arc::new(rules::udf::ResolveNewInstance),
            Arc::new(rules::udf::ResolveUpCast),
            Arc::new(rules::grouping::ResolveGroupingAnalytics),
            Arc::new(rules::grouping::ResolvePivot),
            Arc::new(rules::ordinals::ResolveOrdinals),
            Arc::new(rules::ordinals::ResolveMissingReferences),
            Arc::new(rules::generate::ResolveGenerate),
            Arc::new(rules::functions::ResolveFunctions),
            Arc::new(rules::functions::ResolveAliases),
            Arc::new(rules::subquery::ResolveSubquery),
            Arc::new(rules::window::ResolveWindowOrder),
            Arc::new(rules::window::ResolveWindowFrame),
            Arc::new(rules::window::ExtractWindowExpressions),
            Arc::new(rules::functions::GlobalAggregates),
            Arc::new(rules::functions::ResolveAggregateFunctions),
            Arc::new(rules::time_window::TimeWindowing),
        ];
        resolution.extend(type_coercion::default_rules());
        resolution.extend(self.extended_rules.iter().cloned());

        vec![
            Batch::fixed_point(
                "Substitution",
                max,
                vec![
                    Arc::new(rules::substitution::CteSubstitution),
                    Arc::new(rules::substitution::WindowsSubstitution),
                    Arc::new(rules::substitution::EliminateUnions),
                ],
            ),
            Batch::fixed_point("Resolution", max, resolution),
            Batch::once(
                "Nondeterministic",
                vec![Arc::new(rules::cleanup::PullOutNondeterministic)],
            ),
            Batch::once("UDF", vec![Arc::new(rules::udf::HandleNullInputsForUdf)]),
            Batch::fixed_point(
                "Cleanup",
                max,
                vec![
                    Arc::new(rules::cleanup::CleanupAliases),
                    Arc::new(rules::cleanup::EliminateSubqueryAliases),
                ],
            ),
        ]
    }
}
