use serde::{Deserialize, Serialize};

/// Analyzer configuration shared across planner layers.
///
/// The record is frozen for the duration of one analyzer invocation; rules
/// read it through the analysis context and never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Whether identifier matching is case sensitive.
    #[serde(default)]
    pub case_sensitive_analysis: bool,
    /// Whether integer literals in ORDER BY bind to select-list positions.
    #[serde(default = "default_true")]
    pub order_by_ordinal: bool,
    /// Whether integer literals in GROUP BY bind to select-list positions.
    #[serde(default = "default_true")]
    pub group_by_ordinal: bool,
    /// Whether unresolvable db-qualified relations are left for a file-based
    /// resolver instead of failing immediately.
    #[serde(default)]
    pub run_sql_on_file: bool,
    /// Iteration cap for fixed-point rule batches.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> usize {
    100
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            case_sensitive_analysis: false,
            order_by_ordinal: true,
            group_by_ordinal: true,
            run_sql_on_file: false,
            max_iterations: default_max_iterations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AnalyzerConfig;

    #[test]
    fn defaults_enable_ordinals_and_cap_iterations() {
        let cfg = AnalyzerConfig::default();
        assert!(!cfg.case_sensitive_analysis);
        assert!(cfg.order_by_ordinal);
        assert!(cfg.group_by_ordinal);
        assert_eq!(cfg.max_iterations, 100);
    }
}
