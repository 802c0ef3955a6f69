//! Rewriting of property-path triples into primitive graph patterns.
//!
//! Each triple whose predicate is a non-trivial [PropertyPath] is rewritten
//! into an equivalent pattern of plain triples, unions and transitive-closure
//! operations. Midpoints of sequences are bound to fresh planner-internal
//! variables.

use triplan_common::{PlanResult, PlanningError};
use triplan_model::{
    GraphPattern, GraphPatternOperation, PropertyPath, SparqlTriple, TermPattern, Variable,
    INTERNAL_VARIABLE_PREFIX,
};

/// Expands property paths and owns the planner's fresh-variable counter.
///
/// The counter increases monotonically for the lifetime of a planner
/// instance, so the variables of independently expanded triples never
/// collide.
#[derive(Debug, Default)]
pub struct PathExpander {
    counter: u64,
}

impl PathExpander {
    /// Creates a new [PathExpander].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh variable with the reserved internal prefix.
    pub fn fresh_variable(&mut self) -> Variable {
        let variable = Variable::new_unchecked(format!(
            "{INTERNAL_VARIABLE_PREFIX}{}",
            self.counter
        ));
        self.counter += 1;
        variable
    }

    /// Rewrites `triple` into an equivalent graph pattern. Trivial predicates
    /// (an IRI or a variable) yield the triple unchanged.
    pub fn expand_triple(&mut self, triple: &SparqlTriple) -> PlanResult<GraphPattern> {
        if triple.predicate.is_trivial() {
            return Ok(GraphPattern::bgp(vec![triple.clone()]));
        }
        self.expand(&triple.subject, &triple.predicate, &triple.object)
    }

    fn expand(
        &mut self,
        left: &TermPattern,
        path: &PropertyPath,
        right: &TermPattern,
    ) -> PlanResult<GraphPattern> {
        match path {
            PropertyPath::Iri(iri) => Ok(GraphPattern::bgp(vec![SparqlTriple::new(
                left.clone(),
                iri.clone(),
                right.clone(),
            )])),
            PropertyPath::Variable(variable) => Err(PlanningError::structural(format!(
                "variable predicate {variable} inside a property path"
            ))),
            PropertyPath::Sequence(a, b) => {
                let mid = TermPattern::Variable(self.fresh_variable());
                let first = self.expand(left, a, &mid)?;
                let second = self.expand(&mid, b, right)?;
                Ok(concat(first, second))
            }
            PropertyPath::Alternative(a, b) => {
                let first = self.expand(left, a, right)?;
                let second = self.expand(left, b, right)?;
                Ok(GraphPattern::from_operations(vec![
                    GraphPatternOperation::Union(vec![first, second]),
                ]))
            }
            PropertyPath::Inverse(a) => self.expand(right, a, left),
            PropertyPath::Transitive { path, min, max } => {
                if let Some(max) = max {
                    if min > max {
                        return Err(PlanningError::structural(format!(
                            "malformed property path: minHops {min} exceeds maxHops {max}"
                        )));
                    }
                }
                let begin = self.fresh_variable();
                let end = self.fresh_variable();
                let inner = self.expand(
                    &TermPattern::Variable(begin.clone()),
                    path,
                    &TermPattern::Variable(end.clone()),
                )?;
                Ok(GraphPattern::from_operations(vec![
                    GraphPatternOperation::TransitivePath {
                        subject: left.clone(),
                        object: right.clone(),
                        min: *min,
                        max: *max,
                        inner,
                        inner_begin: begin,
                        inner_end: end,
                    },
                ]))
            }
        }
    }
}

/// Concatenates two patterns, merging adjacent basic graph patterns so pure
/// triple rewrites stay a single BGP.
fn concat(mut left: GraphPattern, right: GraphPattern) -> GraphPattern {
    for operation in right.operations {
        match (left.operations.last_mut(), operation) {
            (
                Some(GraphPatternOperation::Bgp { triples }),
                GraphPatternOperation::Bgp { triples: more },
            ) => triples.extend(more),
            (_, operation) => left.operations.push(operation),
        }
    }
    left
}
