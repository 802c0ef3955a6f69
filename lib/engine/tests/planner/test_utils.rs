use triplan_common::{
    IndexStatistics, PlanResult, Permutation, PredicateStats, ScanConstraints,
    TripleComponent,
};
use triplan_model::{NamedNode, SparqlTriple, Variable};

/// In-memory statistics stub. Cardinalities follow the usual bound-position
/// heuristics; multiplicities are uniform.
pub struct TestStatistics;

impl IndexStatistics for TestStatistics {
    fn cardinality(&self, _: Permutation, constraints: &ScanConstraints) -> PlanResult<u64> {
        let subject = constraints.is_fixed(TripleComponent::Subject);
        let predicate = constraints.is_fixed(TripleComponent::Predicate);
        let object = constraints.is_fixed(TripleComponent::Object);
        Ok(match (subject, predicate, object) {
            (true, true, true) => 1,
            (true, true, false) => 10,
            (true, false, true) => 2,
            (true, false, false) => 100,
            (false, true, true) => 1_000,
            (false, true, false) => 100_000,
            (false, false, true) => 10_000,
            (false, false, false) => 1_000_000,
        })
    }

    fn multiplicity(
        &self,
        _: Permutation,
        _: &ScanConstraints,
        _: TripleComponent,
    ) -> PlanResult<f64> {
        Ok(2.0)
    }

    fn text_matches(&self, _: &str) -> PlanResult<u64> {
        Ok(250)
    }

    fn has_predicate_stats(&self) -> PlanResult<PredicateStats> {
        Ok(PredicateStats {
            distinct_predicates: 300,
            total_rows: 2_000_000,
        })
    }
}

pub fn var(name: &str) -> Variable {
    Variable::new(name).unwrap()
}

pub fn iri(local: &str) -> NamedNode {
    NamedNode::new(format!("http://example.org/{local}")).unwrap()
}

pub fn triple(subject: &str, predicate: &str, object: &str) -> SparqlTriple {
    SparqlTriple::new(var(subject), iri(predicate), var(object))
}
