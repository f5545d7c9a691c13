#![deny(missing_docs)]

//! Shared configuration, error types, and identifiers for Flint crates.
//!
//! Architecture role:
//! - defines the analyzer configuration passed across layers
//! - provides common [`FlintError`] / [`Result`] contracts
//! - hosts the process-wide expression-id mint
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

/// Shared analyzer configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;

pub use config::AnalyzerConfig;
pub use error::{FlintError, Result};
pub use ids::ExprId;
