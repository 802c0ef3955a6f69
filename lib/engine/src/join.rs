//! Enumeration of the physically realizable joins of two candidate plans.

use crate::graph::TripleGraph;
use crate::plan::{PlanKind, SubtreePlan};
use crate::tree::{ExecutionTree, JoinStrategy};
use std::rc::Rc;
use triplan_common::PlanResult;

/// Enumerates every way to combine `a` and `b`.
///
/// During DP a triple graph is supplied and disconnected pairs are skipped,
/// so no cross products arise there. Sequential graph-pattern rows are merged
/// without a graph; a pair without shared variables then becomes a cross
/// join. All shared variables become join columns; the column bijection of
/// a plan rules out carrying the same variable twice.
pub fn create_join_candidates(
    a: &SubtreePlan,
    b: &SubtreePlan,
    graph: Option<&TripleGraph>,
) -> PlanResult<Vec<SubtreePlan>> {
    if let Some(graph) = graph {
        if !a.included_nodes.is_disjoint(b.included_nodes) {
            return Ok(Vec::new());
        }
        if !graph.are_connected_sets(a.included_nodes, b.included_nodes) {
            return Ok(Vec::new());
        }
    }

    match (a.kind, b.kind) {
        // An OPTIONAL side is absorbed by the first join with a basic plan.
        (PlanKind::Basic, PlanKind::Optional) => optional_candidate(a, b),
        (PlanKind::Optional, PlanKind::Basic) => optional_candidate(b, a),
        // MINUS only ever appears as the right operand.
        (PlanKind::Basic, PlanKind::Minus) => minus_candidate(a, b),
        (PlanKind::Basic, PlanKind::Basic) => basic_candidates(a, b, graph.is_some()),
        _ => Ok(Vec::new()),
    }
}

fn optional_candidate(left: &SubtreePlan, right: &SubtreePlan) -> PlanResult<Vec<SubtreePlan>> {
    let join_columns = shared_columns(&left.tree, &right.tree);
    let tree =
        ExecutionTree::optional_join(left.tree.clone(), right.tree.clone(), join_columns)?;
    Ok(vec![combined(left, right, tree)])
}

fn minus_candidate(left: &SubtreePlan, right: &SubtreePlan) -> PlanResult<Vec<SubtreePlan>> {
    let join_columns = shared_columns(&left.tree, &right.tree);
    let tree = ExecutionTree::minus(left.tree.clone(), right.tree.clone(), join_columns);
    Ok(vec![combined(left, right, tree)])
}

fn basic_candidates(
    a: &SubtreePlan,
    b: &SubtreePlan,
    within_dp: bool,
) -> PlanResult<Vec<SubtreePlan>> {
    let join_columns = shared_columns(&a.tree, &b.tree);
    let mut candidates = Vec::new();
    match join_columns.len() {
        0 => {
            // Connected plans always share a variable; a pair without shared
            // columns only occurs outside DP, where it is a cross product.
            if !within_dp {
                let tree = ExecutionTree::join(
                    a.tree.clone(),
                    b.tree.clone(),
                    Vec::new(),
                    JoinStrategy::Hash,
                )?;
                candidates.push(combined(a, b, tree));
            }
        }
        1 => {
            let hash = ExecutionTree::join(
                a.tree.clone(),
                b.tree.clone(),
                join_columns.clone(),
                JoinStrategy::Hash,
            )?;
            candidates.push(combined(a, b, hash));
            candidates.push(combined(a, b, sort_merge(a, b, join_columns)?));
        }
        _ => {
            candidates.push(combined(a, b, sort_merge(a, b, join_columns)?));
        }
    }
    Ok(candidates)
}

/// A sorted join on the full shared tuple; inserts sorts where an input is
/// not already ordered on its join columns.
fn sort_merge(
    a: &SubtreePlan,
    b: &SubtreePlan,
    join_columns: Vec<(usize, usize)>,
) -> PlanResult<Rc<ExecutionTree>> {
    let left_columns: Vec<usize> = join_columns.iter().map(|(l, _)| *l).collect();
    let right_columns: Vec<usize> = join_columns.iter().map(|(_, r)| *r).collect();
    let left = ExecutionTree::sorted_on_columns(&a.tree, &left_columns);
    let right = ExecutionTree::sorted_on_columns(&b.tree, &right_columns);
    ExecutionTree::join(left, right, join_columns, JoinStrategy::SortMerge)
}

/// The variables bound by both trees, as `(columnInA, columnInB)` pairs
/// ordered by the left column.
fn shared_columns(a: &ExecutionTree, b: &ExecutionTree) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = a
        .variable_columns()
        .iter()
        .enumerate()
        .filter_map(|(column, variable)| b.column_of(variable).map(|other| (column, other)))
        .collect();
    pairs.sort_unstable();
    pairs
}

fn combined(a: &SubtreePlan, b: &SubtreePlan, tree: Rc<ExecutionTree>) -> SubtreePlan {
    SubtreePlan {
        tree,
        included_nodes: a.included_nodes | b.included_nodes,
        included_filters: a.included_filters | b.included_filters,
        kind: PlanKind::Basic,
    }
}
