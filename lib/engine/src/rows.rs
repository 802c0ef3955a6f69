//! Solution modifiers on top of the cheapest base plans: the pattern-trick
//! rewrite, GROUP BY, HAVING, ORDER BY and DISTINCT.

use crate::plan::SubtreePlan;
use crate::tree::ExecutionTree;
use triplan_common::{PlanResult, PlanningError};
use triplan_model::vocab::ql;
use triplan_model::{
    AggregateFunction, GraphPatternOperation, ParsedQuery, PropertyPath, QueryClause,
    SparqlTriple, TermPattern, Variable,
};

/// The variables of a detected pattern-trick query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTrick {
    pub subject: Variable,
    pub predicate: Variable,
    pub count: Variable,
}

/// Checks whether the query counts predicates per subject in the shape the
/// precomputed `CountAvailablePredicates` operator answers directly:
///
/// `SELECT ?p (COUNT(?s) AS ?c) WHERE { ?s ql:has-predicate ?p } GROUP BY ?p`
///
/// Detection requires the `ql:has-predicate` triple to be the entire where
/// clause, the aggregate to be a non-distinct COUNT of the subject variable
/// or `*`, and neither `?s` nor `?p` to occur anywhere else.
pub fn detect_pattern_trick(query: &ParsedQuery) -> Option<PatternTrick> {
    let select = query.clause.as_select()?;
    let [group_variable] = &query.group_by[..] else {
        return None;
    };
    if select.variables != [group_variable.clone()] {
        return None;
    }
    let [aggregate] = &select.aggregates[..] else {
        return None;
    };
    if aggregate.function != AggregateFunction::Count || aggregate.distinct {
        return None;
    }

    let [GraphPatternOperation::Bgp { triples }] = &query.root.operations[..] else {
        return None;
    };
    let [triple] = &triples[..] else {
        return None;
    };
    let trick = trick_variables(triple)?;
    if trick.predicate != *group_variable {
        return None;
    }
    match &aggregate.input {
        None => {}
        Some(counted) if *counted == trick.subject => {}
        Some(_) => return None,
    }

    // The subject must have no other uses; a constrained subject falls back
    // to regular planning.
    let subject_elsewhere = query
        .order_by
        .iter()
        .any(|key| key.variable == trick.subject)
        || query
            .having
            .iter()
            .any(|filter| filter.variables().contains(&trick.subject));
    if subject_elsewhere {
        return None;
    }

    Some(PatternTrick {
        count: aggregate.alias.clone(),
        ..trick
    })
}

fn trick_variables(triple: &SparqlTriple) -> Option<PatternTrick> {
    match &triple.predicate {
        PropertyPath::Iri(iri) if *iri == ql::HAS_PREDICATE => {}
        _ => return None,
    }
    let (TermPattern::Variable(subject), TermPattern::Variable(predicate)) =
        (&triple.subject, &triple.object)
    else {
        return None;
    };
    Some(PatternTrick {
        subject: subject.clone(),
        predicate: predicate.clone(),
        // Placeholder; the caller substitutes the aggregate alias.
        count: predicate.clone(),
    })
}

/// Applies GROUP BY and the aggregates, sorting each candidate on its group
/// keys first.
pub fn group_by_row(query: &ParsedQuery, row: Vec<SubtreePlan>) -> PlanResult<Vec<SubtreePlan>> {
    let aggregates = match query.clause.as_select() {
        Some(select) => select.aggregates.clone(),
        None => Vec::new(),
    };
    if query.group_by.is_empty() && aggregates.is_empty() {
        return Ok(row);
    }

    let mut result = Vec::with_capacity(row.len());
    for plan in row {
        let mut key_columns = Vec::with_capacity(query.group_by.len());
        for key in &query.group_by {
            let column = plan
                .tree
                .column_of(key)
                .ok_or_else(|| PlanningError::unbound(key.clone()))?;
            key_columns.push(column);
        }
        for aggregate in &aggregates {
            if let Some(input) = &aggregate.input {
                if plan.tree.column_of(input).is_none() {
                    return Err(PlanningError::unbound(input.clone()));
                }
            }
        }
        let sorted = ExecutionTree::sorted_on_columns(&plan.tree, &key_columns);
        let grouped =
            ExecutionTree::group_by(sorted, query.group_by.clone(), aggregates.clone())?;
        result.push(SubtreePlan {
            tree: grouped,
            ..plan
        });
    }
    Ok(result)
}

/// Appends the HAVING constraints over the grouped output.
pub fn having_row(query: &ParsedQuery, row: Vec<SubtreePlan>) -> PlanResult<Vec<SubtreePlan>> {
    if query.having.is_empty() {
        return Ok(row);
    }
    let mut result = Vec::with_capacity(row.len());
    for plan in row {
        let mut tree = plan.tree.clone();
        for filter in &query.having {
            for variable in filter.variables() {
                if tree.column_of(&variable).is_none() {
                    return Err(PlanningError::unbound(variable));
                }
            }
            tree = ExecutionTree::filter(tree, filter.clone());
        }
        result.push(SubtreePlan { tree, ..plan });
    }
    Ok(result)
}

/// Applies ORDER BY, skipping the sort where an existing order already covers
/// the requested keys.
pub fn order_by_row(query: &ParsedQuery, row: Vec<SubtreePlan>) -> PlanResult<Vec<SubtreePlan>> {
    if query.order_by.is_empty() {
        return Ok(row);
    }
    let mut result = Vec::with_capacity(row.len());
    for plan in row {
        let mut keys = Vec::with_capacity(query.order_by.len());
        for key in &query.order_by {
            let column = plan
                .tree
                .column_of(&key.variable)
                .ok_or_else(|| PlanningError::unbound(key.variable.clone()))?;
            keys.push((column, key.descending));
        }
        let all_ascending = keys.iter().all(|&(_, descending)| !descending);
        let columns: Vec<usize> = keys.iter().map(|(column, _)| *column).collect();
        let tree = if all_ascending && plan.tree.is_sorted_on(&columns) {
            plan.tree.clone()
        } else {
            ExecutionTree::order_by(plan.tree.clone(), keys)
        };
        result.push(SubtreePlan { tree, ..plan });
    }
    Ok(result)
}

/// Applies DISTINCT over the visible columns, inserting a sort where the
/// input order does not already cover them.
pub fn distinct_row(query: &ParsedQuery, row: Vec<SubtreePlan>) -> PlanResult<Vec<SubtreePlan>> {
    if !query.distinct {
        return Ok(row);
    }
    let visible = visible_output_variables(query);
    let mut result = Vec::with_capacity(row.len());
    for plan in row {
        let mut columns = Vec::with_capacity(visible.len());
        for variable in &visible {
            let column = plan
                .tree
                .column_of(variable)
                .ok_or_else(|| PlanningError::unbound(variable.clone()))?;
            columns.push(column);
        }
        let sorted = ExecutionTree::sorted_on_columns(&plan.tree, &columns);
        let tree = ExecutionTree::distinct(sorted, columns)?;
        result.push(SubtreePlan { tree, ..plan });
    }
    Ok(result)
}

/// The variables the query result exposes: the projection plus aggregate
/// aliases for SELECT, the template variables for CONSTRUCT.
pub fn visible_output_variables(query: &ParsedQuery) -> Vec<Variable> {
    let mut visible = query.clause.visible_variables();
    if let QueryClause::Select(select) = &query.clause {
        for aggregate in &select.aggregates {
            if !visible.contains(&aggregate.alias) {
                visible.push(aggregate.alias.clone());
            }
        }
    }
    visible
}
