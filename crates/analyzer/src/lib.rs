//! Logical-plan analysis for Flint SQL.
//!
//! Architecture role:
//! - plan and expression algebra with uniform traversal
//! - fixed-point rule executor driving the analysis batches
//! - name/function/relation resolution against a catalog
//! - structural rewrites (stars, generators, windows, grouping sets,
//!   subqueries, time windows) into canonical operator shapes
//! - terminal validation of every analysis invariant
//!
//! Key modules:
//! - [`expr`] / [`logical_plan`]
//! - [`analyzer`] / [`executor`]
//! - [`catalog`] / [`resolver`]
//! - [`rules`] / [`type_coercion`]
//! - [`explain`]

pub mod analyzer;
pub mod catalog;
pub mod check;
pub mod executor;
pub mod explain;
pub mod expr;
pub mod logical_plan;
pub mod outer_scopes;
pub mod resolver;
pub mod rules;
pub mod type_coercion;

pub use analyzer::{Analyzer, AnalyzerContext};
pub use catalog::{Catalog, MemoryCatalog, TableId, UdfDef};
pub use check::check_analysis;
pub use executor::{AnalyzerRule, Batch, Strategy};
pub use explain::{explain_logical, format_expr};
pub use expr::{
    AggregateKind, AggregateMode, AttributeRef, AttributeSet, BinaryOp, Expr, GeneratorKind,
    LiteralValue, SortDirection, SortOrder, WindowFrameBound, WindowFrameSpec, WindowFrameUnits,
    WindowFunctionKind, WindowSpec,
};
pub use logical_plan::{JoinType, LogicalPlan};
pub use outer_scopes::{add_outer_scope, get_outer_scope};
pub use resolver::NameResolver;
