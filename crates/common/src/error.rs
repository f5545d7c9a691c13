use thiserror::Error;

/// Canonical Flint error taxonomy used across crates.
///
/// Classification guidance:
/// - [`FlintError::Analysis`]: user-facing analysis failures (name/type/shape
///   issues in a query plan); every diagnostic the analyzer raises is of this
///   kind
/// - [`FlintError::NoSuchTable`] / [`FlintError::NoSuchFunction`]: catalog
///   lookup misses; rules translate these into `Analysis` diagnostics with
///   query context
/// - [`FlintError::InvalidConfig`]: configuration contract violations
/// - [`FlintError::Internal`]: invariant violations inside the engine itself
#[derive(Debug, Error)]
pub enum FlintError {
    /// Query analysis failure surfaced to the user.
    ///
    /// Examples:
    /// - unknown or ambiguous column
    /// - misplaced `*`, generator, or aggregate function
    /// - window frame / ordinal / grouping violations
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Catalog lookup miss for a relation.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// Catalog lookup miss for a function.
    #[error("no such function: {0}")]
    NoSuchFunction(String),

    /// Invalid or inconsistent configuration state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine invariant violation; not expected for any user input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FlintError {
    /// Shorthand for an [`FlintError::Analysis`] diagnostic.
    pub fn analysis(message: impl Into<String>) -> Self {
        FlintError::Analysis(message.into())
    }
}

/// Standard Flint result alias.
pub type Result<T> = std::result::Result<T, FlintError>;
