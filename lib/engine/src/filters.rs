//! Placement of FILTER constraints onto candidate plans.
//!
//! A filter is applied as soon as every variable it mentions is bound, which
//! is also always the place where it is applied.

use crate::plan::SubtreePlan;
use crate::tree::ExecutionTree;
use triplan_model::SparqlFilter;

/// Wraps every plan of `row` in the filters whose variables it binds and
/// whose bit is still unset.
///
/// In replace mode the filtered plan supersedes the unfiltered one (used for
/// seeds and for the final row); otherwise both are kept so the DP can weigh
/// early filtering against cheaper join inputs.
pub fn apply_filters_if_possible(
    row: Vec<SubtreePlan>,
    filters: &[SparqlFilter],
    replace: bool,
) -> Vec<SubtreePlan> {
    let mut result = Vec::with_capacity(row.len());
    for plan in row {
        match apply_applicable_filters(&plan, filters) {
            Some(filtered) if replace => result.push(filtered),
            Some(filtered) => {
                result.push(plan);
                result.push(filtered);
            }
            None => result.push(plan),
        }
    }
    result
}

/// Applies all applicable, still-unapplied filters to a single plan.
/// Returns `None` if no filter was applicable.
pub fn apply_applicable_filters(
    plan: &SubtreePlan,
    filters: &[SparqlFilter],
) -> Option<SubtreePlan> {
    let mut current = plan.clone();
    let mut changed = false;
    for (index, filter) in filters.iter().enumerate() {
        if current.included_filters.contains(index) {
            continue;
        }
        let bound = filter
            .variables()
            .iter()
            .all(|variable| current.tree.column_of(variable).is_some());
        if bound {
            current.tree = ExecutionTree::filter(current.tree, filter.clone());
            current.included_filters.insert(index);
            changed = true;
        }
    }
    changed.then_some(current)
}
