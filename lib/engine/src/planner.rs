//! The planner facade: turns a [ParsedQuery] into the cheapest operator tree.

use crate::config::PlannerConfig;
use crate::dp::{merge_candidate_rows, plan_graph, prune, DpContext};
use crate::filters::apply_filters_if_possible;
use crate::graph::TripleGraph;
use crate::paths::PathExpander;
use crate::plan::{find_cheapest, PlanKind, SubtreePlan};
use crate::rows;
use crate::seeds::seed_row;
use crate::tree::ExecutionTree;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use triplan_common::{
    BitSet64, CancellationToken, IndexStatistics, PlanResult, PlanningError,
};
use triplan_model::{
    is_internal_variable, BlankNode, Expression, GraphPattern, GraphPatternOperation,
    ParsedQuery, SparqlFilter, SparqlTriple, TermPattern, Variable,
};

/// Plans parsed SPARQL queries against one index.
///
/// A planner is stateless across queries apart from its fresh-variable
/// counter; it owns no query state and consults the index only through the
/// read-only statistics capability.
pub struct QueryPlanner {
    statistics: Arc<dyn IndexStatistics>,
    config: PlannerConfig,
    cancellation: CancellationToken,
    expander: PathExpander,
}

impl QueryPlanner {
    /// Creates a planner with the default configuration and a token that
    /// never cancels.
    pub fn new(statistics: Arc<dyn IndexStatistics>) -> Self {
        Self {
            statistics,
            config: PlannerConfig::default(),
            cancellation: CancellationToken::new(),
            expander: PathExpander::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Plans `query` and returns the cheapest operator tree.
    pub fn create_execution_tree(
        &mut self,
        query: &ParsedQuery,
    ) -> PlanResult<Rc<ExecutionTree>> {
        let text_limit = parse_text_limit(query.text_limit.as_deref(), self.config.text_limit)?;
        validate_user_variables(query)?;

        if self.config.enable_pattern_trick {
            if let Some(trick) = rows::detect_pattern_trick(query) {
                debug!(subject = %trick.subject, predicate = %trick.predicate,
                    "applying the pattern-trick rewrite");
                let tree = ExecutionTree::count_available_predicates(
                    self.statistics.as_ref(),
                    trick.subject,
                    trick.predicate,
                    trick.count,
                )?;
                let row = vec![SubtreePlan::new(tree, BitSet64::EMPTY)];
                // The rewrite already grouped; only the later modifiers
                // remain.
                let row = rows::having_row(query, row)?;
                let row = rows::order_by_row(query, row)?;
                let row = rows::distinct_row(query, row)?;
                return self.finalize(query, row);
            }
        }

        let row = self.optimize(&query.root, text_limit)?;
        let row = rows::group_by_row(query, row)?;
        let row = rows::having_row(query, row)?;
        let row = rows::order_by_row(query, row)?;
        let row = rows::distinct_row(query, row)?;
        self.finalize(query, row)
    }

    /// Picks the cheapest candidate, checks the projection and attaches
    /// LIMIT/OFFSET.
    fn finalize(
        &self,
        query: &ParsedQuery,
        row: Vec<SubtreePlan>,
    ) -> PlanResult<Rc<ExecutionTree>> {
        let deterministic = self.config.deterministic_tie_break;
        let cheapest = find_cheapest(&row, deterministic)
            .ok_or_else(|| PlanningError::Internal("no candidate plan produced".to_owned()))?;
        let tree = row[cheapest].tree.clone();

        for variable in rows::visible_output_variables(query) {
            if tree.column_of(&variable).is_none() {
                return Err(PlanningError::unbound(variable));
            }
        }

        let tree = if query.limit.is_some() || query.offset > 0 {
            ExecutionTree::with_slice(&tree, query.limit, query.offset)
        } else {
            tree
        };
        debug!(cost = tree.cost_estimate(), size = tree.size_estimate(),
            key = tree.cache_key(), "query planned");
        Ok(tree)
    }

    /// Plans one graph pattern: BGPs through the triple-graph DP, the other
    /// operations as sequential candidate rows merged left to right.
    fn optimize(
        &mut self,
        pattern: &GraphPattern,
        text_limit: u32,
    ) -> PlanResult<Vec<SubtreePlan>> {
        let filters: Vec<SparqlFilter> = pattern
            .operations
            .iter()
            .filter_map(|operation| match operation {
                GraphPatternOperation::Filter(filter) => Some(filter.clone()),
                _ => None,
            })
            .collect();
        if filters.len() > BitSet64::CAPACITY {
            return Err(PlanningError::structural(format!(
                "graph pattern has {} filters, the planner supports at most {}",
                filters.len(),
                BitSet64::CAPACITY
            )));
        }

        let mut current: Option<Vec<SubtreePlan>> = None;
        let mut buffer: Vec<SparqlTriple> = Vec::new();
        for operation in &pattern.operations {
            match operation {
                GraphPatternOperation::Bgp { triples } => {
                    buffer.extend(triples.iter().cloned());
                    continue;
                }
                GraphPatternOperation::Filter(_) => continue,
                _ => {}
            }
            if !buffer.is_empty() {
                let triples = std::mem::take(&mut buffer);
                let row = self.plan_bgp(&triples, &filters, text_limit)?;
                current = self.merge_into(current, row, &filters)?;
            }

            match operation {
                GraphPatternOperation::Optional(inner) => {
                    let row = imported(self.optimize(inner, text_limit)?, PlanKind::Optional);
                    current = self.merge_into(current, row, &filters)?;
                }
                GraphPatternOperation::Minus(inner) => {
                    let row = imported(self.optimize(inner, text_limit)?, PlanKind::Minus);
                    current = self.merge_into(current, row, &filters)?;
                }
                GraphPatternOperation::Union(branches) => {
                    let row = self.union_row(branches, text_limit)?;
                    current = self.merge_into(current, row, &filters)?;
                }
                GraphPatternOperation::Subquery(subquery) => {
                    let tree = self.create_execution_tree(subquery)?;
                    let row = vec![SubtreePlan::new(tree, BitSet64::EMPTY)];
                    current = self.merge_into(current, row, &filters)?;
                }
                GraphPatternOperation::Values {
                    variables,
                    bindings,
                } => {
                    let tree = ExecutionTree::values(variables.clone(), bindings.clone());
                    let row = vec![SubtreePlan::new(tree, BitSet64::EMPTY)];
                    current = self.merge_into(current, row, &filters)?;
                }
                GraphPatternOperation::TransitivePath {
                    subject,
                    object,
                    min,
                    max,
                    inner,
                    inner_begin,
                    inner_end,
                } => {
                    let row = self.transitive_row(
                        subject, object, *min, *max, inner, inner_begin, inner_end, text_limit,
                    )?;
                    current = self.merge_into(current, row, &filters)?;
                }
                GraphPatternOperation::Bind {
                    expression,
                    variable,
                } => {
                    let row = current.take().unwrap_or_else(neutral_row);
                    current = Some(bind_row(row, expression, variable)?);
                }
                GraphPatternOperation::Bgp { .. } | GraphPatternOperation::Filter(_) => {
                    unreachable!("handled above")
                }
            }
        }
        if !buffer.is_empty() {
            let triples = std::mem::take(&mut buffer);
            let row = self.plan_bgp(&triples, &filters, text_limit)?;
            current = self.merge_into(current, row, &filters)?;
        }

        let row = current.unwrap_or_else(neutral_row);
        let row = apply_filters_if_possible(row, &filters, true);
        if let Some(plan) = row.first() {
            for (index, filter) in filters.iter().enumerate() {
                if !plan.included_filters.contains(index) {
                    let unbound = filter
                        .variables()
                        .into_iter()
                        .find(|variable| plan.tree.column_of(variable).is_none());
                    return Err(match unbound {
                        Some(variable) => PlanningError::UnboundVariable {
                            variable,
                            position: filter.position,
                        },
                        None => PlanningError::Internal(
                            "filter with bound variables was never applied".to_owned(),
                        ),
                    });
                }
            }
        }
        Ok(prune(row, self.config.deterministic_tie_break))
    }

    /// Plans a basic graph pattern through the triple-graph DP.
    fn plan_bgp(
        &mut self,
        triples: &[SparqlTriple],
        filters: &[SparqlFilter],
        text_limit: u32,
    ) -> PlanResult<Vec<SubtreePlan>> {
        let (triples, extra_filters) = self.preprocess_triples(triples);
        let mut all_filters = filters.to_vec();
        all_filters.extend(extra_filters);
        if all_filters.len() > BitSet64::CAPACITY {
            return Err(PlanningError::structural(
                "too many filters after triple normalization",
            ));
        }

        // Expand property paths. Pure triple rewrites are inlined into the
        // BGP; rewrites with unions or transitive closures are planned
        // recursively and attached to the original triple's node.
        let mut graph_triples: Vec<SparqlTriple> = Vec::new();
        let mut path_candidates: FxHashMap<usize, Vec<SubtreePlan>> = FxHashMap::default();
        for triple in &triples {
            if triple.predicate.is_trivial() {
                graph_triples.push(triple.clone());
                continue;
            }
            let expanded = self.expander.expand_triple(triple)?;
            let is_plain_bgp = matches!(
                &expanded.operations[..],
                [GraphPatternOperation::Bgp { .. }]
            );
            if is_plain_bgp {
                if let [GraphPatternOperation::Bgp { triples: inlined }] =
                    &expanded.operations[..]
                {
                    graph_triples.extend(inlined.iter().cloned());
                }
            } else {
                let candidates = imported(
                    self.optimize(&expanded, text_limit)?,
                    PlanKind::Basic,
                );
                path_candidates.insert(graph_triples.len(), candidates);
                graph_triples.push(triple.clone());
            }
        }

        let context_variables = context_variables(&graph_triples)?;
        let mut graph = TripleGraph::build(&graph_triples, &context_variables)?;
        let mapping = graph.collapse_text_cliques()?;
        let path_candidates: FxHashMap<usize, Vec<SubtreePlan>> = path_candidates
            .into_iter()
            .map(|(old, candidates)| match mapping[old] {
                Some(new) => Ok((new, candidates)),
                None => PlanningError::internal("path triple absorbed into a text clique"),
            })
            .collect::<PlanResult<_>>()?;

        let seeds = seed_row(
            self.statistics.as_ref(),
            &graph,
            &path_candidates,
            text_limit,
        )?;
        let context = DpContext {
            graph: &graph,
            filters: &all_filters,
            cancellation: &self.cancellation,
            deterministic: self.config.deterministic_tie_break,
        };
        plan_graph(&context, seeds)
    }

    /// Replaces blank nodes with fresh variables and splits variables that
    /// repeat within one triple, materializing the lost equality as a
    /// filter.
    fn preprocess_triples(
        &mut self,
        triples: &[SparqlTriple],
    ) -> (Vec<SparqlTriple>, Vec<SparqlFilter>) {
        let mut blank_variables: FxHashMap<BlankNode, Variable> = FxHashMap::default();
        let mut extra_filters = Vec::new();
        let mut result = Vec::with_capacity(triples.len());
        for triple in triples {
            let mut triple = triple.clone();
            for pattern in [&mut triple.subject, &mut triple.object] {
                if let TermPattern::BlankNode(blank) = pattern {
                    let variable = blank_variables
                        .entry(blank.clone())
                        .or_insert_with(|| self.expander.fresh_variable())
                        .clone();
                    *pattern = TermPattern::Variable(variable);
                }
            }

            let mut seen: Vec<Variable> = Vec::new();
            if let Some(variable) = triple.predicate.as_variable() {
                seen.push(variable.clone());
            }
            for pattern in [&mut triple.subject, &mut triple.object] {
                if let TermPattern::Variable(variable) = pattern {
                    if seen.contains(variable) {
                        let fresh = self.expander.fresh_variable();
                        extra_filters.push(SparqlFilter::new(Expression::equal(
                            variable.clone().into(),
                            fresh.clone().into(),
                        )));
                        *pattern = TermPattern::Variable(fresh.clone());
                        seen.push(fresh);
                    } else {
                        seen.push(variable.clone());
                    }
                }
            }
            result.push(triple);
        }
        (result, extra_filters)
    }

    fn merge_into(
        &self,
        current: Option<Vec<SubtreePlan>>,
        row: Vec<SubtreePlan>,
        filters: &[SparqlFilter],
    ) -> PlanResult<Option<Vec<SubtreePlan>>> {
        match current {
            None => Ok(Some(row)),
            Some(current) => Ok(Some(merge_candidate_rows(
                &current,
                &row,
                filters,
                &self.cancellation,
                self.config.deterministic_tie_break,
                false,
            )?)),
        }
    }

    /// Plans every UNION branch and folds the cheapest plans into a union
    /// tree.
    fn union_row(
        &mut self,
        branches: &[GraphPattern],
        text_limit: u32,
    ) -> PlanResult<Vec<SubtreePlan>> {
        let deterministic = self.config.deterministic_tie_break;
        let mut tree: Option<Rc<ExecutionTree>> = None;
        for branch in branches {
            let row = self.optimize(branch, text_limit)?;
            let cheapest = find_cheapest(&row, deterministic).ok_or_else(|| {
                PlanningError::structural("UNION with an empty branch")
            })?;
            let branch_tree = row[cheapest].tree.clone();
            tree = Some(match tree {
                None => branch_tree,
                Some(left) => ExecutionTree::union(left, branch_tree),
            });
        }
        let tree =
            tree.ok_or_else(|| PlanningError::structural("UNION without branches"))?;
        Ok(vec![SubtreePlan::new(tree, BitSet64::EMPTY)])
    }

    #[allow(clippy::too_many_arguments, reason = "mirrors the operation fields")]
    fn transitive_row(
        &mut self,
        subject: &TermPattern,
        object: &TermPattern,
        min: u32,
        max: Option<u32>,
        inner: &GraphPattern,
        inner_begin: &Variable,
        inner_end: &Variable,
        text_limit: u32,
    ) -> PlanResult<Vec<SubtreePlan>> {
        let row = self.optimize(inner, text_limit)?;
        let cheapest = find_cheapest(&row, self.config.deterministic_tie_break)
            .ok_or_else(|| PlanningError::structural("transitive path over an empty pattern"))?;
        let inner_tree = row[cheapest].tree.clone();
        let begin_column = inner_tree.column_of(inner_begin).ok_or_else(|| {
            PlanningError::Internal("transitive path lost its begin variable".to_owned())
        })?;
        let end_column = inner_tree.column_of(inner_end).ok_or_else(|| {
            PlanningError::Internal("transitive path lost its end variable".to_owned())
        })?;
        let tree = ExecutionTree::transitive_path(
            inner_tree,
            begin_column,
            end_column,
            subject.clone(),
            object.clone(),
            min,
            max,
        )?;
        Ok(vec![SubtreePlan::new(tree, BitSet64::EMPTY)])
    }
}

/// Rebases candidate plans of a nested pattern onto the enclosing level:
/// node and filter coverage restart at zero there.
fn imported(row: Vec<SubtreePlan>, kind: PlanKind) -> Vec<SubtreePlan> {
    row.into_iter()
        .map(|plan| SubtreePlan {
            tree: plan.tree,
            included_nodes: BitSet64::EMPTY,
            included_filters: BitSet64::EMPTY,
            kind,
        })
        .collect()
}

fn neutral_row() -> Vec<SubtreePlan> {
    vec![SubtreePlan::new(ExecutionTree::neutral(), BitSet64::EMPTY)]
}

/// Wraps every plan of `row` in a BIND.
fn bind_row(
    row: Vec<SubtreePlan>,
    expression: &Expression,
    variable: &Variable,
) -> PlanResult<Vec<SubtreePlan>> {
    let mut result = Vec::with_capacity(row.len());
    for plan in row {
        for used in expression.variables() {
            if plan.tree.column_of(&used).is_none() {
                return Err(PlanningError::unbound(used));
            }
        }
        let tree = ExecutionTree::bind(plan.tree, expression.clone(), variable.clone())?;
        result.push(SubtreePlan {
            tree,
            included_nodes: plan.included_nodes,
            included_filters: plan.included_filters,
            kind: plan.kind,
        });
    }
    Ok(result)
}

/// The subjects of text operations. They must be variables.
fn context_variables(triples: &[SparqlTriple]) -> PlanResult<BTreeSet<Variable>> {
    let mut result = BTreeSet::new();
    for triple in triples {
        if !triple.is_text_operation() {
            continue;
        }
        match &triple.subject {
            TermPattern::Variable(variable) => {
                result.insert(variable.clone());
            }
            other => {
                return Err(PlanningError::structural(format!(
                    "text operation with non-variable context {other}"
                )));
            }
        }
    }
    Ok(result)
}

/// Parses the TEXTLIMIT argument: a decimal non-negative integer.
fn parse_text_limit(raw: Option<&str>, default: u32) -> PlanResult<u32> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
            PlanningError::structural(format!("invalid TEXTLIMIT value \"{raw}\""))
        }),
    }
}

/// User queries must not contain variables with the planner-internal prefix.
fn validate_user_variables(query: &ParsedQuery) -> PlanResult<()> {
    let mut variables = query.root.bound_variables();
    variables.extend(rows::visible_output_variables(query));
    variables.extend(query.group_by.iter().cloned());
    variables.extend(query.order_by.iter().map(|key| key.variable.clone()));
    for variable in variables {
        if is_internal_variable(&variable) {
            return Err(PlanningError::structural(format!(
                "variable {variable} uses the reserved internal prefix"
            )));
        }
    }
    Ok(())
}
