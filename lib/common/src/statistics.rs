use crate::PlanResult;
use std::fmt;
use triplan_model::Term;

/// One of the three positions of a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TripleComponent {
    Subject,
    Predicate,
    Object,
}

impl fmt::Display for TripleComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject => write!(f, "S"),
            Self::Predicate => write!(f, "P"),
            Self::Object => write!(f, "O"),
        }
    }
}

/// One of the six sorted orderings of the triple columns used as index access
/// paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permutation {
    Spo,
    Sop,
    Pso,
    Pos,
    Osp,
    Ops,
}

impl Permutation {
    pub const ALL: [Permutation; 6] = [
        Permutation::Spo,
        Permutation::Sop,
        Permutation::Pso,
        Permutation::Pos,
        Permutation::Osp,
        Permutation::Ops,
    ];

    /// The column order of this permutation, most significant first.
    pub fn column_order(self) -> [TripleComponent; 3] {
        use TripleComponent::{Object, Predicate, Subject};
        match self {
            Self::Spo => [Subject, Predicate, Object],
            Self::Sop => [Subject, Object, Predicate],
            Self::Pso => [Predicate, Subject, Object],
            Self::Pos => [Predicate, Object, Subject],
            Self::Osp => [Object, Subject, Predicate],
            Self::Ops => [Object, Predicate, Subject],
        }
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.column_order();
        write!(f, "{a}{b}{c}")
    }
}

/// The constant terms a scan binds, by triple position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConstraints {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl ScanConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, component: TripleComponent, term: Term) -> Self {
        self.set(component, term);
        self
    }

    pub fn set(&mut self, component: TripleComponent, term: Term) {
        match component {
            TripleComponent::Subject => self.subject = Some(term),
            TripleComponent::Predicate => self.predicate = Some(term),
            TripleComponent::Object => self.object = Some(term),
        }
    }

    pub fn get(&self, component: TripleComponent) -> Option<&Term> {
        match component {
            TripleComponent::Subject => self.subject.as_ref(),
            TripleComponent::Predicate => self.predicate.as_ref(),
            TripleComponent::Object => self.object.as_ref(),
        }
    }

    pub fn is_fixed(&self, component: TripleComponent) -> bool {
        self.get(component).is_some()
    }

    /// The number of fixed positions (0 to 3).
    pub fn fixed_count(&self) -> usize {
        [
            TripleComponent::Subject,
            TripleComponent::Predicate,
            TripleComponent::Object,
        ]
        .into_iter()
        .filter(|c| self.is_fixed(*c))
        .count()
    }
}

impl fmt::Display for ScanConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in [
            TripleComponent::Subject,
            TripleComponent::Predicate,
            TripleComponent::Object,
        ] {
            if let Some(term) = self.get(component) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{component}={term}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Statistics over the `ql:has-predicate` relation, used by the
/// pattern-trick rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredicateStats {
    pub distinct_predicates: u64,
    pub total_rows: u64,
}

/// The capability by which the planner obtains estimates from the physical
/// index.
///
/// Implementations must be safe to call concurrently from multiple planner
/// instances; all calls are read-only. The planner validates returned values
/// and raises [crate::PlanningError::IndexCapability] on impossible ones
/// (e.g. a multiplicity below one).
pub trait IndexStatistics: Send + Sync {
    /// The number of rows of `permutation` with the given constants bound.
    fn cardinality(
        &self,
        permutation: Permutation,
        constraints: &ScanConstraints,
    ) -> PlanResult<u64>;

    /// The average number of rows per distinct value of `column` in the scan
    /// described by `permutation` and `constraints`. Must be `>= 1.0`.
    fn multiplicity(
        &self,
        permutation: Permutation,
        constraints: &ScanConstraints,
        column: TripleComponent,
    ) -> PlanResult<f64>;

    /// The estimated number of text records matching a word part.
    fn text_matches(&self, word_part: &str) -> PlanResult<u64>;

    /// Statistics over the precomputed `ql:has-predicate` relation.
    fn has_predicate_stats(&self) -> PlanResult<PredicateStats>;
}
