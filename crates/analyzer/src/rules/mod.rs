//! The analyzer's rewrite rules, grouped by concern.
//!
//! Rule order inside the Resolution batch is fixed in
//! [`crate::analyzer::Analyzer`]; rules here must tolerate re-application
//! within a fixed-point batch.

pub mod cleanup;
pub mod functions;
pub mod generate;
pub mod grouping;
pub mod ordinals;
pub mod references;
pub mod relations;
pub mod substitution;
pub mod subquery;
pub mod time_window;
pub mod udf;
pub mod window;
