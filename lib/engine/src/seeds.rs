//! Candidate leaf plans for the nodes of a triple graph.
//!
//! Plain triples seed index scans in every compatible permutation, text
//! cliques seed text leaves, and nodes stemming from expanded property paths
//! carry their recursively planned candidates.

use crate::graph::{TripleGraph, TripleGraphNode};
use crate::plan::{PlanKind, SubtreePlan};
use crate::tree::ExecutionTree;
use rustc_hash::FxHashMap;
use triplan_common::{
    BitSet64, IndexStatistics, PlanResult, PlanningError, Permutation, ScanConstraints,
    TripleComponent,
};
use triplan_model::{PropertyPath, Term, TermPattern, Variable};

/// The content of one triple position: a constant to scan for or a variable
/// to bind.
enum Position {
    Fixed(Term),
    Free(Variable),
}

/// Builds the first DP row: every candidate leaf plan per graph node.
///
/// `path_candidates` holds the recursively planned candidates of nodes whose
/// predicate was a non-trivial property path; their node and filter coverage
/// is rebased onto the enclosing graph here.
pub fn seed_row(
    statistics: &dyn IndexStatistics,
    graph: &TripleGraph,
    path_candidates: &FxHashMap<usize, Vec<SubtreePlan>>,
    text_limit: u32,
) -> PlanResult<Vec<SubtreePlan>> {
    let mut row = Vec::new();
    for node in graph.nodes() {
        if node.is_text_node() {
            row.push(text_leaf_plan(statistics, node, text_limit)?);
        } else if let Some(candidates) = path_candidates.get(&node.id) {
            for candidate in candidates {
                row.push(SubtreePlan {
                    tree: candidate.tree.clone(),
                    included_nodes: BitSet64::singleton(node.id),
                    included_filters: BitSet64::EMPTY,
                    kind: PlanKind::Basic,
                });
            }
        } else {
            row.extend(triple_scan_seeds(statistics, node)?);
        }
    }
    Ok(row)
}

/// The text-leaf incarnation of a collapsed clique: matching contexts crossed
/// with up to `limit` entities per connected variable.
fn text_leaf_plan(
    statistics: &dyn IndexStatistics,
    node: &TripleGraphNode,
    limit: u32,
) -> PlanResult<SubtreePlan> {
    let context_variable = node
        .context_variable
        .clone()
        .ok_or_else(|| PlanningError::Internal("text leaf for a non-text node".to_owned()))?;
    let word_part = node
        .word_part
        .clone()
        .ok_or_else(|| PlanningError::Internal("text node without word part".to_owned()))?;
    let entity_variables: Vec<Variable> = node
        .variables
        .iter()
        .filter(|v| **v != context_variable)
        .cloned()
        .collect();
    let tree = ExecutionTree::text_leaf(
        statistics,
        context_variable,
        word_part,
        entity_variables,
        limit,
    )?;
    Ok(SubtreePlan::seed(tree, node.id))
}

/// All index scans answering a single triple.
fn triple_scan_seeds(
    statistics: &dyn IndexStatistics,
    node: &TripleGraphNode,
) -> PlanResult<Vec<SubtreePlan>> {
    let triple = &node.triple;
    let subject = term_position(&triple.subject)?;
    let predicate = predicate_position(&triple.predicate)?;
    let object = term_position(&triple.object)?;

    let mut constraints = ScanConstraints::new();
    let mut fixed = Vec::new();
    let mut free = FxHashMap::default();
    for (component, position) in [
        (TripleComponent::Subject, subject),
        (TripleComponent::Predicate, predicate),
        (TripleComponent::Object, object),
    ] {
        match position {
            Position::Fixed(term) => {
                constraints.set(component, term);
                fixed.push(component);
            }
            Position::Free(variable) => {
                free.insert(component, variable);
            }
        }
    }

    let mut row = Vec::new();
    for permutation in compatible_permutations(&fixed) {
        let scan_free: Vec<(TripleComponent, Variable)> = permutation
            .column_order()
            .into_iter()
            .filter_map(|component| {
                free.get(&component)
                    .map(|variable| (component, variable.clone()))
            })
            .collect();
        let tree =
            ExecutionTree::index_scan(statistics, permutation, constraints.clone(), scan_free)?;
        row.push(SubtreePlan::seed(tree, node.id));
    }
    Ok(row)
}

/// The permutations whose sort order starts with the fixed positions.
///
/// With one free position only the canonical permutation (fixed positions in
/// subject-predicate-object order) is kept; the alternatives scan the same
/// single column and would only duplicate plans. A fully bound triple becomes
/// a single existence check on SPO.
fn compatible_permutations(fixed: &[TripleComponent]) -> Vec<Permutation> {
    match fixed.len() {
        0 => Permutation::ALL.to_vec(),
        3 => vec![Permutation::Spo],
        _ => {
            let mut result: Vec<Permutation> = Permutation::ALL
                .into_iter()
                .filter(|permutation| {
                    let order = permutation.column_order();
                    fixed.iter().all(|f| order[..fixed.len()].contains(f))
                })
                .collect();
            if fixed.len() == 2 {
                // Both compatible permutations scan the same free column;
                // keep the one whose prefix is in S-P-O order.
                result.retain(|permutation| {
                    let order = permutation.column_order();
                    order[0] < order[1]
                });
            }
            result
        }
    }
}

fn term_position(pattern: &TermPattern) -> PlanResult<Position> {
    match pattern {
        TermPattern::Variable(variable) => Ok(Position::Free(variable.clone())),
        TermPattern::NamedNode(node) => Ok(Position::Fixed(node.clone().into())),
        TermPattern::Literal(literal) => Ok(Position::Fixed(literal.clone().into())),
        TermPattern::BlankNode(_) => Err(PlanningError::Internal(
            "blank node survived query preprocessing".to_owned(),
        )),
        _ => Err(PlanningError::structural(
            "embedded triple patterns are not supported",
        )),
    }
}

fn predicate_position(predicate: &PropertyPath) -> PlanResult<Position> {
    match predicate {
        PropertyPath::Iri(iri) => Ok(Position::Fixed(iri.clone().into())),
        PropertyPath::Variable(variable) => Ok(Position::Free(variable.clone())),
        _ => Err(PlanningError::Internal(
            "non-trivial property path reached the seed builder".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use triplan_common::PredicateStats;
    use triplan_model::vocab::ql;
    use triplan_model::{Literal, NamedNode, SparqlTriple};

    struct UniformStatistics;

    impl IndexStatistics for UniformStatistics {
        fn cardinality(&self, _: Permutation, constraints: &ScanConstraints) -> PlanResult<u64> {
            Ok(match constraints.fixed_count() {
                0 => 1_000_000,
                1 => 10_000,
                2 => 100,
                _ => 1,
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
            Ok(500)
        }

        fn has_predicate_stats(&self) -> PlanResult<PredicateStats> {
            Ok(PredicateStats {
                distinct_predicates: 10,
                total_rows: 1000,
            })
        }
    }

    fn var(name: &str) -> Variable {
        Variable::new(name).unwrap()
    }

    fn iri(local: &str) -> NamedNode {
        NamedNode::new(format!("http://example.org/{local}")).unwrap()
    }

    fn seeds_for(triple: SparqlTriple) -> Vec<SubtreePlan> {
        let graph = TripleGraph::build(&[triple], &BTreeSet::new()).unwrap();
        seed_row(&UniformStatistics, &graph, &FxHashMap::default(), 1).unwrap()
    }

    #[test]
    fn one_variable_yields_the_canonical_permutation() {
        let seeds = seeds_for(SparqlTriple::new(
            var("x"),
            iri("p"),
            TermPattern::NamedNode(iri("o")),
        ));
        assert_eq!(seeds.len(), 1);
        match seeds[0].tree.operation() {
            crate::tree::Operation::IndexScan { permutation, .. } => {
                assert_eq!(*permutation, Permutation::Pos);
            }
            other => panic!("expected an index scan, got {other:?}"),
        }
        assert_eq!(seeds[0].tree.variable_columns(), &[var("x")]);
    }

    #[test]
    fn two_variables_yield_both_orders() {
        let seeds = seeds_for(SparqlTriple::new(var("s"), iri("p"), var("o")));
        let permutations: Vec<Permutation> = seeds
            .iter()
            .map(|seed| match seed.tree.operation() {
                crate::tree::Operation::IndexScan { permutation, .. } => *permutation,
                other => panic!("expected an index scan, got {other:?}"),
            })
            .collect();
        assert_eq!(permutations, vec![Permutation::Pso, Permutation::Pos]);

        // The two scans expose the same variables in different column orders.
        assert_eq!(seeds[0].tree.variable_columns(), &[var("s"), var("o")]);
        assert_eq!(seeds[1].tree.variable_columns(), &[var("o"), var("s")]);
    }

    #[test]
    fn three_variables_yield_all_six_permutations() {
        let seeds = seeds_for(SparqlTriple::new(
            var("s"),
            PropertyPath::Variable(var("p")),
            var("o"),
        ));
        assert_eq!(seeds.len(), 6);
        for seed in &seeds {
            assert_eq!(seed.tree.arity(), 3);
            assert!(seed.tree.is_sorted_on(&[0, 1, 2]));
        }
    }

    #[test]
    fn fully_bound_triple_becomes_an_existence_check() {
        let seeds = seeds_for(SparqlTriple::new(
            TermPattern::NamedNode(iri("s")),
            iri("p"),
            TermPattern::Literal(Literal::new_simple_literal("o")),
        ));
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].tree.arity(), 0);
        assert_eq!(seeds[0].tree.size_estimate(), 1);
    }

    #[test]
    fn text_nodes_seed_text_leaves() {
        let context_variables = BTreeSet::from([var("c")]);
        let mut graph = TripleGraph::build(
            &[
                SparqlTriple::new(
                    var("c"),
                    ql::CONTAINS_WORD.into_owned(),
                    TermPattern::Literal(Literal::new_simple_literal("edible")),
                ),
                SparqlTriple::new(var("c"), ql::CONTAINS_ENTITY.into_owned(), var("plant")),
            ],
            &context_variables,
        )
        .unwrap();
        graph.collapse_text_cliques().unwrap();

        let seeds = seed_row(&UniformStatistics, &graph, &FxHashMap::default(), 5).unwrap();
        assert_eq!(seeds.len(), 1);
        match seeds[0].tree.operation() {
            crate::tree::Operation::TextLeaf {
                word_part,
                entity_variables,
                limit,
                ..
            } => {
                assert_eq!(word_part, "edible");
                assert_eq!(entity_variables, &[var("plant")]);
                assert_eq!(*limit, 5);
            }
            other => panic!("expected a text leaf, got {other:?}"),
        }
        // 500 contexts, one entity variable crossed with up to 5 entities.
        assert_eq!(seeds[0].tree.size_estimate(), 2500);
    }
}
