//! Bottom-up dynamic programming over connected subsets of triple-graph
//! nodes.
//!
//! `row[k]` holds the non-dominated plans covering exactly `k` nodes. Within
//! one pruning class `(sortedOrder, includedNodes, includedFilters)` only the
//! cheapest plan survives; equal costs are broken by cache key in
//! deterministic mode and by insertion order otherwise.

use crate::filters::apply_filters_if_possible;
use crate::graph::TripleGraph;
use crate::join::create_join_candidates;
use crate::plan::SubtreePlan;
use rustc_hash::FxHashMap;
use tracing::trace;
use triplan_common::{BitSet64, CancellationToken, PlanResult, PlanningError};
use triplan_model::{SparqlFilter, Variable};

/// Shared state of one DP run.
pub struct DpContext<'a> {
    pub graph: &'a TripleGraph,
    pub filters: &'a [SparqlFilter],
    pub cancellation: &'a CancellationToken,
    pub deterministic: bool,
}

/// Plans the whole triple graph from its seed row.
///
/// Each connected component is enumerated separately; the component results
/// are then combined with cross joins, cheap components first. The returned
/// row covers all nodes, with every filter answerable from the graph's
/// variables already applied.
pub fn plan_graph(
    context: &DpContext<'_>,
    seeds: Vec<SubtreePlan>,
) -> PlanResult<Vec<SubtreePlan>> {
    let components = context.graph.connected_components();
    let mut component_rows = Vec::with_capacity(components.len());
    for component in components {
        let component_seeds: Vec<SubtreePlan> = seeds
            .iter()
            .filter(|seed| seed.included_nodes.is_subset(component))
            .cloned()
            .collect();
        component_rows.push(fill_dp_tab(context, component, component_seeds)?);
    }

    let mut combined: Option<Vec<SubtreePlan>> = None;
    for row in component_rows {
        combined = Some(match combined {
            None => row,
            // Components share no variables, so this merges via cross joins.
            Some(current) => merge_candidate_rows(
                &current,
                &row,
                context.filters,
                context.cancellation,
                context.deterministic,
                false,
            )?,
        });
    }
    let row = combined.unwrap_or_default();

    // The final row must cover every filter that the graph can answer.
    let row = apply_filters_if_possible(row, context.filters, true);
    Ok(prune(row, context.deterministic))
}

/// The classical bottom-up enumeration over one connected component.
fn fill_dp_tab(
    context: &DpContext<'_>,
    component: BitSet64,
    seeds: Vec<SubtreePlan>,
) -> PlanResult<Vec<SubtreePlan>> {
    let node_count = component.len();
    if seeds.is_empty() || node_count == 0 {
        return PlanningError::internal("dp enumeration over an empty component");
    }

    let seeds = apply_filters_if_possible(seeds, context.filters, false);
    let mut table: Vec<Vec<SubtreePlan>> = vec![prune(seeds, context.deterministic)];

    for k in 2..=node_count {
        context.cancellation.check()?;
        let mut row = Vec::new();
        let mut index = FxHashMap::default();
        for i in 1..k {
            let (left_row, right_row) = (&table[i - 1], &table[k - i - 1]);
            for a in left_row {
                for b in right_row {
                    context.cancellation.check()?;
                    let candidates = create_join_candidates(a, b, Some(context.graph))?;
                    let candidates =
                        apply_filters_if_possible(candidates, context.filters, false);
                    for candidate in candidates {
                        insert_pruned(&mut row, &mut index, candidate, context.deterministic);
                    }
                }
            }
        }
        trace!(k, plans = row.len(), "dp row complete");
        if row.is_empty() {
            return PlanningError::internal(format!(
                "dp row {k} of a connected component is empty"
            ));
        }
        table.push(row);
    }

    Ok(table.pop().unwrap_or_default())
}

/// Merges two candidate rows outside the triple-graph DP (sequential pattern
/// operations and cross-component combination). Joins on all shared
/// variables; without any, the pair becomes a cross join.
pub fn merge_candidate_rows(
    left_row: &[SubtreePlan],
    right_row: &[SubtreePlan],
    filters: &[SparqlFilter],
    cancellation: &CancellationToken,
    deterministic: bool,
    replace_filters: bool,
) -> PlanResult<Vec<SubtreePlan>> {
    let mut row = Vec::new();
    let mut index = FxHashMap::default();
    for a in left_row {
        for b in right_row {
            cancellation.check()?;
            let candidates = create_join_candidates(a, b, None)?;
            let candidates = apply_filters_if_possible(candidates, filters, replace_filters);
            for candidate in candidates {
                insert_pruned(&mut row, &mut index, candidate, deterministic);
            }
        }
    }
    Ok(row)
}

type PruningKey = (Vec<Variable>, u64, u64);

/// The equivalence class of a plan: the variables it is sorted on plus its
/// node and filter coverage. Sort order is keyed by variable, not column
/// index, since column layouts differ between plans of the same class.
fn pruning_key(plan: &SubtreePlan) -> PruningKey {
    let sorted_variables = plan
        .tree
        .sorted_on()
        .iter()
        .map(|column| plan.tree.variable_columns()[*column].clone())
        .collect();
    (
        sorted_variables,
        plan.included_nodes.bits(),
        plan.included_filters.bits(),
    )
}

/// Inserts `plan` into `row`, keeping only the cheapest plan per pruning
/// class.
fn insert_pruned(
    row: &mut Vec<SubtreePlan>,
    index: &mut FxHashMap<PruningKey, usize>,
    plan: SubtreePlan,
    deterministic: bool,
) {
    match index.entry(pruning_key(&plan)) {
        std::collections::hash_map::Entry::Vacant(entry) => {
            entry.insert(row.len());
            row.push(plan);
        }
        std::collections::hash_map::Entry::Occupied(entry) => {
            let current = &mut row[*entry.get()];
            let replace = match plan.cost_estimate().cmp(&current.cost_estimate()) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => {
                    deterministic && plan.cache_key() < current.cache_key()
                }
                std::cmp::Ordering::Greater => false,
            };
            if replace {
                *current = plan;
            }
        }
    }
}

/// Prunes a finished row down to the cheapest plan per class.
pub(crate) fn prune(row: Vec<SubtreePlan>, deterministic: bool) -> Vec<SubtreePlan> {
    let mut result = Vec::with_capacity(row.len());
    let mut index = FxHashMap::default();
    for plan in row {
        insert_pruned(&mut result, &mut index, plan, deterministic);
    }
    result
}
