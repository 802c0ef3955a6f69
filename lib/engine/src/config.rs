/// Configuration options recognized by the planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Rewrite eligible predicate-counting queries into the precomputed
    /// `CountAvailablePredicates` operator.
    pub enable_pattern_trick: bool,
    /// Default number of entities a text leaf crosses per matching context,
    /// used when the query carries no TEXTLIMIT.
    pub text_limit: u32,
    /// Break equal-cost ties by lexicographic cache-key comparison instead of
    /// insertion order. Slower, but makes plans reproducible; enabled by the
    /// test suites.
    pub deterministic_tie_break: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enable_pattern_trick: true,
            text_limit: 1,
            deterministic_tie_break: false,
        }
    }
}
