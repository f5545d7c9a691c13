//! Typed identifiers shared across planner components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one produced column in a logical plan.
///
/// Two attribute references carrying the same id denote the same column, no
/// matter how they are spelled. Fresh ids come from a process-wide counter so
/// that concurrent analyzer invocations never collide; uniqueness is the
/// contract, strict monotonicity is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(
    /// Raw numeric id value.
    pub u64,
);

impl ExprId {
    /// Mint a fresh, process-unique id.
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::ExprId;

    #[test]
    fn fresh_ids_are_unique() {
        let a = ExprId::fresh();
        let b = ExprId::fresh();
        assert_ne!(a, b);
    }
}
