//! The executable operator tree produced by the planner.
//!
//! Nodes are immutable after construction and shared between candidate plans
//! via [Rc]. Size, cost, multiplicity and sortedness estimates are computed
//! eagerly when a node is built and cached on it; the only external input to
//! the estimates is the [IndexStatistics] capability.

use itertools::Itertools;
use std::fmt;
use std::rc::Rc;
use triplan_common::{
    IndexStatistics, PlanResult, PlanningError, Permutation, ScanConstraints,
    TripleComponent,
};
use triplan_model::{
    AggregateExpression, Expression, GroundTerm, SparqlFilter, TermPattern, Variable,
    INTERNAL_VARIABLE_PREFIX,
};

/// How a binary join is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Build a hash table over one side; no sort prerequisite.
    Hash,
    /// Merge two inputs sorted on their join columns.
    SortMerge,
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => write!(f, "HASH"),
            Self::SortMerge => write!(f, "SORT-MERGE"),
        }
    }
}

/// One node of the operator tree.
#[derive(Debug, Clone)]
pub enum Operation {
    /// A scan of one index permutation with constants bound. `free` lists the
    /// unbound positions in permutation order; an empty list is an existence
    /// check.
    IndexScan {
        permutation: Permutation,
        constraints: ScanConstraints,
        free: Vec<(TripleComponent, Variable)>,
    },
    /// An inner join. Empty `join_columns` is a cross product (only produced
    /// when combining disconnected components or sequential pattern rows).
    Join {
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
        join_columns: Vec<(usize, usize)>,
        strategy: JoinStrategy,
    },
    /// A left outer join preserving all rows of `left`.
    OptionalJoin {
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
        join_columns: Vec<(usize, usize)>,
    },
    /// Keeps the rows of `left` without a match in `right`.
    Minus {
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
        join_columns: Vec<(usize, usize)>,
    },
    Filter {
        input: Rc<ExecutionTree>,
        filter: SparqlFilter,
    },
    /// `BIND(expression AS variable)`, appending one column.
    Bind {
        input: Rc<ExecutionTree>,
        expression: Expression,
        variable: Variable,
    },
    /// Sorts ascending on the given columns (an internal order requirement,
    /// not a solution modifier).
    Sort {
        input: Rc<ExecutionTree>,
        columns: Vec<usize>,
    },
    /// The ORDER BY solution modifier; `true` marks a descending key.
    OrderBy {
        input: Rc<ExecutionTree>,
        keys: Vec<(usize, bool)>,
    },
    /// Deduplicates on the given columns; presumes the input is sorted on
    /// them.
    Distinct {
        input: Rc<ExecutionTree>,
        columns: Vec<usize>,
    },
    /// Grouping with aggregates; presumes the input is sorted on the key
    /// columns. Output columns are the keys followed by the aggregate
    /// aliases.
    GroupBy {
        input: Rc<ExecutionTree>,
        keys: Vec<Variable>,
        aggregates: Vec<AggregateExpression>,
    },
    Union {
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
    },
    /// Transitive closure of the relation computed by `input` (bound between
    /// `begin_column` and `end_column`) with hop bounds `[min, max]`,
    /// `max = None` meaning unbounded. A constant endpoint anchors the
    /// closure.
    TransitivePath {
        input: Rc<ExecutionTree>,
        begin_column: usize,
        end_column: usize,
        subject: TermPattern,
        object: TermPattern,
        min: u32,
        max: Option<u32>,
    },
    /// Matches a word part against the text index and crosses each matching
    /// context with up to `limit` co-occurring entities.
    TextLeaf {
        context_variable: Variable,
        word_part: String,
        entity_variables: Vec<Variable>,
        limit: u32,
    },
    /// Precomputed predicate counting (the pattern-trick operator): for every
    /// predicate of the `ql:has-predicate` relation, the number of subjects
    /// carrying it.
    CountAvailablePredicates {
        subject_variable: Variable,
        predicate_variable: Variable,
        count_variable: Variable,
    },
    /// Inline bindings; an unbound cell is `None`.
    Values {
        variables: Vec<Variable>,
        bindings: Vec<Vec<Option<GroundTerm>>>,
    },
}

/// An immutable, estimate-carrying operator tree.
///
/// `limit`/`offset` are metadata on the final tree only and do not influence
/// the estimates.
#[derive(Debug, Clone)]
pub struct ExecutionTree {
    operation: Operation,
    /// Column index -> variable; a bijection onto `0..arity`.
    columns: Vec<Variable>,
    size_estimate: u64,
    cost_estimate: u64,
    multiplicities: Vec<f64>,
    sorted_on: Vec<usize>,
    cache_key: String,
    limit: Option<u64>,
    offset: u64,
}

impl ExecutionTree {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// The output columns, index -> variable.
    pub fn variable_columns(&self) -> &[Variable] {
        &self.columns
    }

    /// The column bound to `variable`, if any.
    pub fn column_of(&self, variable: &Variable) -> Option<usize> {
        self.columns.iter().position(|v| v == variable)
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn size_estimate(&self) -> u64 {
        self.size_estimate
    }

    pub fn cost_estimate(&self) -> u64 {
        self.cost_estimate
    }

    /// The average number of rows per distinct value of `column`.
    pub fn multiplicity(&self, column: usize) -> f64 {
        self.multiplicities.get(column).copied().unwrap_or(1.0)
    }

    /// The estimated number of distinct values of `column`.
    pub fn distinct_estimate(&self, column: usize) -> f64 {
        let size = self.size_estimate.max(1) as f64;
        (size / self.multiplicity(column)).max(1.0)
    }

    /// The columns the output is sorted on, most significant first.
    pub fn sorted_on(&self) -> &[usize] {
        &self.sorted_on
    }

    /// True if the output is sorted on `columns` as a prefix of its sort
    /// order.
    pub fn is_sorted_on(&self, columns: &[usize]) -> bool {
        columns.len() <= self.sorted_on.len() && self.sorted_on[..columns.len()] == *columns
    }

    /// A stable string identifying this tree; used for pruning, tie-breaking
    /// and result caching.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns a copy of `tree` carrying LIMIT/OFFSET metadata.
    pub fn with_slice(tree: &Rc<Self>, limit: Option<u64>, offset: u64) -> Rc<Self> {
        let mut copy = (**tree).clone();
        copy.limit = limit;
        copy.offset = offset;
        Rc::new(copy)
    }

    /// Creates an index scan. `free` must list the unbound positions in the
    /// order of `permutation`; the scan output is sorted on all its columns.
    pub fn index_scan(
        statistics: &dyn IndexStatistics,
        permutation: Permutation,
        constraints: ScanConstraints,
        free: Vec<(TripleComponent, Variable)>,
    ) -> PlanResult<Rc<Self>> {
        let size = statistics.cardinality(permutation, &constraints)?;
        let mut multiplicities = Vec::with_capacity(free.len());
        for (component, _) in &free {
            let multiplicity = statistics.multiplicity(permutation, &constraints, *component)?;
            if !multiplicity.is_finite() || multiplicity < 1.0 {
                return Err(PlanningError::IndexCapability(format!(
                    "index reported impossible multiplicity {multiplicity} for column {component} of {permutation}"
                )));
            }
            multiplicities.push(multiplicity);
        }
        let columns: Vec<Variable> = free.iter().map(|(_, v)| v.clone()).collect();
        let cache_key = format!(
            "SCAN {permutation} [{constraints}] -> ({})",
            columns.iter().join(" ")
        );
        Ok(Rc::new(Self {
            operation: Operation::IndexScan {
                permutation,
                constraints,
                free,
            },
            sorted_on: (0..columns.len()).collect(),
            columns,
            size_estimate: size,
            cost_estimate: size,
            multiplicities,
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Creates a text leaf returning the context, the co-occurring entity
    /// variables and a score column.
    pub fn text_leaf(
        statistics: &dyn IndexStatistics,
        context_variable: Variable,
        word_part: String,
        entity_variables: Vec<Variable>,
        limit: u32,
    ) -> PlanResult<Rc<Self>> {
        let matches = statistics.text_matches(&word_part)?;
        let mut size = matches;
        for _ in &entity_variables {
            size = size.saturating_mul(u64::from(limit.max(1)));
        }

        let score_variable = Variable::new_unchecked(format!(
            "{INTERNAL_VARIABLE_PREFIX}score_{}",
            context_variable.as_str()
        ));
        let mut columns = vec![context_variable.clone()];
        columns.extend(entity_variables.iter().cloned());
        columns.push(score_variable);

        let cache_key = format!(
            "TEXT(\"{word_part}\" LIMIT {limit}) -> ({})",
            columns.iter().join(" ")
        );
        Ok(Rc::new(Self {
            operation: Operation::TextLeaf {
                context_variable,
                word_part,
                entity_variables,
                limit,
            },
            multiplicities: vec![1.0; columns.len()],
            columns,
            size_estimate: size,
            cost_estimate: size,
            sorted_on: Vec::new(),
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Creates an inner join. A sort-merge join requires both inputs to be
    /// sorted on their join columns (callers insert [Operation::Sort] nodes
    /// beforehand).
    pub fn join(
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
        join_columns: Vec<(usize, usize)>,
        strategy: JoinStrategy,
    ) -> PlanResult<Rc<Self>> {
        if strategy == JoinStrategy::SortMerge {
            let left_columns: Vec<usize> = join_columns.iter().map(|(l, _)| *l).collect();
            let right_columns: Vec<usize> = join_columns.iter().map(|(_, r)| *r).collect();
            if !left.is_sorted_on(&left_columns) || !right.is_sorted_on(&right_columns) {
                return PlanningError::internal(
                    "sort-merge join over inputs not sorted on their join columns",
                );
            }
        }

        let columns = joined_columns(&left, &right, &join_columns)?;
        let size = join_size_estimate(&left, &right, &join_columns);
        let cost = left
            .cost_estimate
            .saturating_add(right.cost_estimate)
            .saturating_add(left.size_estimate)
            .saturating_add(right.size_estimate);
        let multiplicities = joined_multiplicities(&left, &right, &join_columns, size);
        let sorted_on = match strategy {
            JoinStrategy::Hash => Vec::new(),
            JoinStrategy::SortMerge => join_columns.iter().map(|(l, _)| *l).collect(),
        };
        let pairs = join_columns
            .iter()
            .map(|(l, r)| format!("{l}={r}"))
            .join(",");
        let cache_key = format!(
            "JOIN-{strategy}[{pairs}]({},{})",
            left.cache_key, right.cache_key
        );
        Ok(Rc::new(Self {
            operation: Operation::Join {
                left,
                right,
                join_columns,
                strategy,
            },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on,
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Creates a left outer join preserving all rows of `left`.
    pub fn optional_join(
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
        join_columns: Vec<(usize, usize)>,
    ) -> PlanResult<Rc<Self>> {
        let columns = joined_columns(&left, &right, &join_columns)?;
        let size = join_size_estimate(&left, &right, &join_columns).max(left.size_estimate);
        let cost = left
            .cost_estimate
            .saturating_add(right.cost_estimate)
            .saturating_add(left.size_estimate)
            .saturating_add(right.size_estimate);
        let multiplicities = joined_multiplicities(&left, &right, &join_columns, size);
        let pairs = join_columns
            .iter()
            .map(|(l, r)| format!("{l}={r}"))
            .join(",");
        let cache_key = format!(
            "OPTIONAL-JOIN[{pairs}]({},{})",
            left.cache_key, right.cache_key
        );
        Ok(Rc::new(Self {
            operation: Operation::OptionalJoin {
                left,
                right,
                join_columns,
            },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on: Vec::new(),
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Creates a minus keeping left rows without a match. The output columns
    /// are exactly the left columns.
    pub fn minus(
        left: Rc<ExecutionTree>,
        right: Rc<ExecutionTree>,
        join_columns: Vec<(usize, usize)>,
    ) -> Rc<Self> {
        let size = left.size_estimate;
        let cost = left
            .cost_estimate
            .saturating_add(right.cost_estimate)
            .saturating_add(left.size_estimate)
            .saturating_add(right.size_estimate);
        let pairs = join_columns
            .iter()
            .map(|(l, r)| format!("{l}={r}"))
            .join(",");
        let cache_key = format!("MINUS[{pairs}]({},{})", left.cache_key, right.cache_key);
        let columns = left.columns.clone();
        let multiplicities = left.multiplicities.clone();
        let sorted_on = left.sorted_on.clone();
        Rc::new(Self {
            operation: Operation::Minus {
                left,
                right,
                join_columns,
            },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on,
            cache_key,
            limit: None,
            offset: 0,
        })
    }

    /// Wraps `input` in a filter. Halves the size estimate.
    pub fn filter(input: Rc<ExecutionTree>, filter: SparqlFilter) -> Rc<Self> {
        let size = input.size_estimate.div_ceil(2);
        let cost = input.cost_estimate.saturating_add(input.size_estimate);
        let cache_key = format!("FILTER[{}]({})", filter.expression, input.cache_key);
        let columns = input.columns.clone();
        let multiplicities = capped_multiplicities(&input.multiplicities, size);
        let sorted_on = input.sorted_on.clone();
        Rc::new(Self {
            operation: Operation::Filter { input, filter },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on,
            cache_key,
            limit: None,
            offset: 0,
        })
    }

    /// Appends the column computed by `BIND(expression AS variable)`.
    pub fn bind(
        input: Rc<ExecutionTree>,
        expression: Expression,
        variable: Variable,
    ) -> PlanResult<Rc<Self>> {
        if input.column_of(&variable).is_some() {
            return Err(PlanningError::structural(format!(
                "BIND target {variable} is already bound"
            )));
        }
        let mut columns = input.columns.clone();
        columns.push(variable.clone());
        let mut multiplicities = input.multiplicities.clone();
        multiplicities.push(1.0);
        let size = input.size_estimate;
        let cost = input.cost_estimate.saturating_add(size);
        let cache_key = format!("BIND[{expression} AS {variable}]({})", input.cache_key);
        let sorted_on = input.sorted_on.clone();
        Ok(Rc::new(Self {
            operation: Operation::Bind {
                input,
                expression,
                variable,
            },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on,
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Sorts the input ascending on `columns`.
    pub fn sort(input: Rc<ExecutionTree>, columns: Vec<usize>) -> Rc<Self> {
        let size = input.size_estimate;
        let cost = input.cost_estimate.saturating_add(sort_cost(size));
        let cache_key = format!(
            "SORT[{}]({})",
            columns.iter().join(","),
            input.cache_key
        );
        let output_columns = input.columns.clone();
        let multiplicities = input.multiplicities.clone();
        Rc::new(Self {
            operation: Operation::Sort {
                input,
                columns: columns.clone(),
            },
            columns: output_columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on: columns,
            cache_key,
            limit: None,
            offset: 0,
        })
    }

    /// The ORDER BY solution modifier.
    pub fn order_by(input: Rc<ExecutionTree>, keys: Vec<(usize, bool)>) -> Rc<Self> {
        let size = input.size_estimate;
        let cost = input.cost_estimate.saturating_add(sort_cost(size));
        let rendered = keys
            .iter()
            .map(|(column, descending)| {
                if *descending {
                    format!("DESC({column})")
                } else {
                    format!("ASC({column})")
                }
            })
            .join(",");
        let cache_key = format!("ORDER-BY[{rendered}]({})", input.cache_key);
        let columns = input.columns.clone();
        let multiplicities = input.multiplicities.clone();
        let sorted_on = keys.iter().map(|(column, _)| *column).collect();
        Rc::new(Self {
            operation: Operation::OrderBy { input, keys },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on,
            cache_key,
            limit: None,
            offset: 0,
        })
    }

    /// Deduplicates on `columns`; the input must already be sorted on them.
    pub fn distinct(input: Rc<ExecutionTree>, columns: Vec<usize>) -> PlanResult<Rc<Self>> {
        if !input.is_sorted_on(&columns) {
            return PlanningError::internal(
                "distinct over an input not sorted on the distinct columns",
            );
        }
        let size = input.size_estimate;
        let cost = input.cost_estimate.saturating_add(size);
        let cache_key = format!(
            "DISTINCT[{}]({})",
            columns.iter().join(","),
            input.cache_key
        );
        let output_columns = input.columns.clone();
        let multiplicities = input.multiplicities.clone();
        let sorted_on = input.sorted_on.clone();
        Ok(Rc::new(Self {
            operation: Operation::Distinct { input, columns },
            columns: output_columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on,
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Groups the input on `keys` (input must be sorted on them) and computes
    /// the aggregates. Output columns are the keys followed by the aggregate
    /// aliases.
    pub fn group_by(
        input: Rc<ExecutionTree>,
        keys: Vec<Variable>,
        aggregates: Vec<AggregateExpression>,
    ) -> PlanResult<Rc<Self>> {
        let mut key_columns = Vec::with_capacity(keys.len());
        for key in &keys {
            let column = input
                .column_of(key)
                .ok_or_else(|| PlanningError::unbound(key.clone()))?;
            key_columns.push(column);
        }
        if !input.is_sorted_on(&key_columns) {
            return PlanningError::internal("group-by over an input not sorted on its keys");
        }

        let mut size = if keys.is_empty() { 1 } else { 0 };
        for column in &key_columns {
            size = size.max(input.distinct_estimate(*column) as u64);
        }
        let size = size.min(input.size_estimate.max(1));
        let cost = input.cost_estimate.saturating_add(input.size_estimate);

        let mut columns = keys.clone();
        columns.extend(aggregates.iter().map(|a| a.alias.clone()));
        let cache_key = format!(
            "GROUP-BY[{} | {}]({})",
            keys.iter().join(" "),
            aggregates.iter().join(" "),
            input.cache_key
        );
        Ok(Rc::new(Self {
            operation: Operation::GroupBy {
                input,
                keys,
                aggregates,
            },
            multiplicities: vec![1.0; columns.len()],
            sorted_on: (0..key_columns.len()).collect(),
            columns,
            size_estimate: size,
            cost_estimate: cost,
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Concatenates two branches. The output binds the union of both column
    /// sets; columns missing on one side are unbound there.
    pub fn union(left: Rc<ExecutionTree>, right: Rc<ExecutionTree>) -> Rc<Self> {
        let mut columns = left.columns.clone();
        for variable in &right.columns {
            if !columns.contains(variable) {
                columns.push(variable.clone());
            }
        }
        let size = left.size_estimate.saturating_add(right.size_estimate);
        let cost = left
            .cost_estimate
            .saturating_add(right.cost_estimate)
            .saturating_add(size);
        let cache_key = format!("UNION({},{})", left.cache_key, right.cache_key);
        let multiplicities = vec![1.0; columns.len()];
        Rc::new(Self {
            operation: Operation::Union { left, right },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on: Vec::new(),
            cache_key,
            limit: None,
            offset: 0,
        })
    }

    /// Creates a transitive closure over the relation computed by `input`
    /// with hop bounds `[min, max]`.
    pub fn transitive_path(
        input: Rc<ExecutionTree>,
        begin_column: usize,
        end_column: usize,
        subject: TermPattern,
        object: TermPattern,
        min: u32,
        max: Option<u32>,
    ) -> PlanResult<Rc<Self>> {
        let mut columns = Vec::new();
        if let TermPattern::Variable(variable) = &subject {
            columns.push(variable.clone());
        }
        if let TermPattern::Variable(variable) = &object {
            if columns.contains(variable) {
                return Err(PlanningError::structural(format!(
                    "transitive path with identical endpoints {variable} is not supported"
                )));
            }
            columns.push(variable.clone());
        }

        // Fan-out heuristic: every extra hop multiplies the relation, an
        // anchored endpoint restricts it.
        let hops = u64::from(max.unwrap_or(4).clamp(1, 4));
        let mut size = input.size_estimate.saturating_mul(hops).max(1);
        if columns.len() < 2 {
            size = (size / 10).max(1);
        }
        let cost = input.cost_estimate.saturating_add(size);

        let bounds = match max {
            Some(max) => format!("{min},{max}"),
            None => format!("{min},*"),
        };
        let cache_key = format!(
            "TRANSITIVE[{subject} {object} {bounds}]({})",
            input.cache_key
        );
        let multiplicities = vec![1.0; columns.len()];
        Ok(Rc::new(Self {
            operation: Operation::TransitivePath {
                input,
                begin_column,
                end_column,
                subject,
                object,
                min,
                max,
            },
            columns,
            size_estimate: size,
            cost_estimate: cost,
            multiplicities,
            sorted_on: Vec::new(),
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Creates the precomputed predicate-counting operator. The output binds
    /// `(predicate_variable, count_variable)` sorted on the predicate.
    pub fn count_available_predicates(
        statistics: &dyn IndexStatistics,
        subject_variable: Variable,
        predicate_variable: Variable,
        count_variable: Variable,
    ) -> PlanResult<Rc<Self>> {
        let stats = statistics.has_predicate_stats()?;
        let size = stats.distinct_predicates.max(1);
        let cost = stats.total_rows.max(size);
        let cache_key = format!(
            "COUNT-AVAILABLE-PREDICATES[{subject_variable} {predicate_variable} {count_variable}]"
        );
        Ok(Rc::new(Self {
            operation: Operation::CountAvailablePredicates {
                subject_variable,
                predicate_variable: predicate_variable.clone(),
                count_variable: count_variable.clone(),
            },
            columns: vec![predicate_variable, count_variable],
            size_estimate: size,
            cost_estimate: cost,
            multiplicities: vec![1.0, 1.0],
            sorted_on: vec![0],
            cache_key,
            limit: None,
            offset: 0,
        }))
    }

    /// Creates inline bindings.
    pub fn values(
        variables: Vec<Variable>,
        bindings: Vec<Vec<Option<GroundTerm>>>,
    ) -> Rc<Self> {
        let size = bindings.len() as u64;
        let rendered = bindings
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Some(term) => term.to_string(),
                        None => "UNDEF".to_owned(),
                    })
                    .join(" ")
            })
            .join(";");
        let cache_key = format!(
            "VALUES[{}]{{{rendered}}}",
            variables.iter().join(" ")
        );
        let multiplicities = vec![1.0; variables.len()];
        Rc::new(Self {
            operation: Operation::Values {
                variables: variables.clone(),
                bindings,
            },
            columns: variables,
            size_estimate: size,
            cost_estimate: size,
            multiplicities,
            sorted_on: Vec::new(),
            cache_key,
            limit: None,
            offset: 0,
        })
    }

    /// The neutral plan of an empty graph pattern: a single empty binding.
    pub fn neutral() -> Rc<Self> {
        Self::values(Vec::new(), vec![Vec::new()])
    }

    /// Wraps `tree` in a sort on `columns` unless it is already sorted on
    /// them.
    pub fn sorted_on_columns(tree: &Rc<Self>, columns: &[usize]) -> Rc<Self> {
        if tree.is_sorted_on(columns) {
            Rc::clone(tree)
        } else {
            Self::sort(Rc::clone(tree), columns.to_vec())
        }
    }
}

/// `size · ⌈log₂ size⌉`
fn sort_cost(size: u64) -> u64 {
    if size <= 1 {
        return size;
    }
    let bits = u64::from(64 - size.leading_zeros());
    size.saturating_mul(bits)
}

/// The equi-join size estimate
/// `|a| * |b| * m_a * m_b / max(d_a, d_b)`, floored to one. Empty join
/// columns denote a cross product.
fn join_size_estimate(
    left: &ExecutionTree,
    right: &ExecutionTree,
    join_columns: &[(usize, usize)],
) -> u64 {
    let Some((left_column, right_column)) = join_columns.first().copied() else {
        return left
            .size_estimate
            .saturating_mul(right.size_estimate)
            .max(1);
    };
    let m_left = left.multiplicity(left_column);
    let m_right = right.multiplicity(right_column);
    let distinct = left
        .distinct_estimate(left_column)
        .max(right.distinct_estimate(right_column));
    let size = (left.size_estimate as f64) * (right.size_estimate as f64) * m_left * m_right
        / distinct;
    if size >= u64::MAX as f64 {
        u64::MAX
    } else {
        (size as u64).max(1)
    }
}

/// The output columns of a join: all left columns, then the right columns
/// that are not join columns. Every remaining right variable must be fresh;
/// callers join on all shared variables.
fn joined_columns(
    left: &ExecutionTree,
    right: &ExecutionTree,
    join_columns: &[(usize, usize)],
) -> PlanResult<Vec<Variable>> {
    let mut columns = left.columns.clone();
    for (index, variable) in right.columns.iter().enumerate() {
        if join_columns.iter().any(|(_, r)| *r == index) {
            continue;
        }
        if columns.contains(variable) {
            return PlanningError::internal(format!(
                "join would bind {variable} twice; shared variables must be join columns"
            ));
        }
        columns.push(variable.clone());
    }
    Ok(columns)
}

fn joined_multiplicities(
    left: &ExecutionTree,
    right: &ExecutionTree,
    join_columns: &[(usize, usize)],
    size: u64,
) -> Vec<f64> {
    let (left_join, right_join) = match join_columns.first() {
        Some((l, r)) => (
            left.multiplicity(*l),
            right.multiplicity(*r),
        ),
        None => (left.size_estimate.max(1) as f64, right.size_estimate.max(1) as f64),
    };
    let mut multiplicities = Vec::new();
    for column in 0..left.arity() {
        multiplicities.push(left.multiplicity(column) * right_join);
    }
    for (index, _) in right.columns.iter().enumerate() {
        if join_columns.iter().any(|(_, r)| *r == index) {
            continue;
        }
        multiplicities.push(right.multiplicity(index) * left_join);
    }
    capped_multiplicities(&multiplicities, size)
}

/// A column's multiplicity can never exceed the relation size.
fn capped_multiplicities(multiplicities: &[f64], size: u64) -> Vec<f64> {
    let cap = size.max(1) as f64;
    multiplicities.iter().map(|m| m.min(cap).max(1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use triplan_common::PredicateStats;

    struct FixedStatistics {
        cardinality: u64,
        multiplicity: f64,
    }

    impl IndexStatistics for FixedStatistics {
        fn cardinality(&self, _: Permutation, _: &ScanConstraints) -> PlanResult<u64> {
            Ok(self.cardinality)
        }

        fn multiplicity(
            &self,
            _: Permutation,
            _: &ScanConstraints,
            _: TripleComponent,
        ) -> PlanResult<f64> {
            Ok(self.multiplicity)
        }

        fn text_matches(&self, _: &str) -> PlanResult<u64> {
            Ok(self.cardinality)
        }

        fn has_predicate_stats(&self) -> PlanResult<PredicateStats> {
            Ok(PredicateStats {
                distinct_predicates: 7,
                total_rows: 100,
            })
        }
    }

    fn var(name: &str) -> Variable {
        Variable::new(name).unwrap()
    }

    fn scan(statistics: &dyn IndexStatistics, names: &[&str]) -> Rc<ExecutionTree> {
        let order = Permutation::Spo.column_order();
        let free = names
            .iter()
            .zip(order)
            .map(|(name, component)| (component, var(name)))
            .collect();
        ExecutionTree::index_scan(
            statistics,
            Permutation::Spo,
            ScanConstraints::new(),
            free,
        )
        .unwrap()
    }

    #[test]
    fn scan_is_sorted_on_all_columns() {
        let statistics = FixedStatistics {
            cardinality: 100,
            multiplicity: 2.0,
        };
        let tree = scan(&statistics, &["x", "y"]);
        assert_eq!(tree.arity(), 2);
        assert_eq!(tree.size_estimate(), 100);
        assert_eq!(tree.cost_estimate(), 100);
        assert!(tree.is_sorted_on(&[0]));
        assert!(tree.is_sorted_on(&[0, 1]));
        assert!(!tree.is_sorted_on(&[1]));
    }

    #[test]
    fn scan_rejects_impossible_multiplicity() {
        let statistics = FixedStatistics {
            cardinality: 100,
            multiplicity: 0.5,
        };
        let order = Permutation::Spo.column_order();
        let result = ExecutionTree::index_scan(
            &statistics,
            Permutation::Spo,
            ScanConstraints::new(),
            vec![(order[0], var("x"))],
        );
        assert!(matches!(result, Err(PlanningError::IndexCapability(_))));
    }

    #[test]
    fn join_size_follows_the_formula() {
        let statistics = FixedStatistics {
            cardinality: 100,
            multiplicity: 2.0,
        };
        let left = scan(&statistics, &["x", "a"]);
        let right = scan(&statistics, &["x", "b"]);
        let join =
            ExecutionTree::join(left, right, vec![(0, 0)], JoinStrategy::SortMerge).unwrap();

        // 100 * 100 * 2 * 2 / max(50, 50) = 800
        assert_eq!(join.size_estimate(), 800);
        assert_eq!(
            join.variable_columns(),
            &[var("x"), var("a"), var("b")]
        );
        assert!(join.is_sorted_on(&[0]));
        assert!(join.cost_estimate() >= 100 + 100);
    }

    #[test]
    fn hash_join_output_is_unsorted() {
        let statistics = FixedStatistics {
            cardinality: 10,
            multiplicity: 1.0,
        };
        let left = scan(&statistics, &["x"]);
        let right = scan(&statistics, &["x", "y"]);
        let join = ExecutionTree::join(left, right, vec![(0, 0)], JoinStrategy::Hash).unwrap();
        assert!(join.sorted_on().is_empty());
    }

    #[test]
    fn sort_merge_join_requires_sorted_inputs() {
        let statistics = FixedStatistics {
            cardinality: 10,
            multiplicity: 1.0,
        };
        let left = scan(&statistics, &["x", "a"]);
        let right = scan(&statistics, &["b", "x"]);
        // Right side is sorted on column 0, not on its join column 1.
        let result = ExecutionTree::join(left, right, vec![(0, 1)], JoinStrategy::SortMerge);
        assert!(matches!(result, Err(PlanningError::Internal(_))));
    }

    #[test]
    fn join_rejects_duplicate_non_join_variables() {
        let statistics = FixedStatistics {
            cardinality: 10,
            multiplicity: 1.0,
        };
        let left = scan(&statistics, &["x", "y"]);
        let right = scan(&statistics, &["x", "y"]);
        let result = ExecutionTree::join(left, right, vec![(0, 0)], JoinStrategy::Hash);
        assert!(matches!(result, Err(PlanningError::Internal(_))));
    }

    #[test]
    fn minus_keeps_left_columns_only() {
        let statistics = FixedStatistics {
            cardinality: 10,
            multiplicity: 1.0,
        };
        let left = scan(&statistics, &["x", "a"]);
        let right = scan(&statistics, &["x", "hidden"]);
        let minus = ExecutionTree::minus(left, right, vec![(0, 0)]);
        assert_eq!(minus.variable_columns(), &[var("x"), var("a")]);
        assert_eq!(minus.size_estimate(), 10);
    }

    #[test]
    fn cache_keys_are_stable_and_distinct() {
        let statistics = FixedStatistics {
            cardinality: 10,
            multiplicity: 1.0,
        };
        let a = scan(&statistics, &["x"]);
        let b = scan(&statistics, &["x"]);
        assert_eq!(a.cache_key(), b.cache_key());

        let join_ab =
            ExecutionTree::join(Rc::clone(&a), Rc::clone(&b), vec![(0, 0)], JoinStrategy::Hash)
                .unwrap();
        let merge_ab = ExecutionTree::join(a, b, vec![(0, 0)], JoinStrategy::SortMerge).unwrap();
        assert_ne!(join_ab.cache_key(), merge_ab.cache_key());
    }

    #[test]
    fn group_by_outputs_keys_then_aliases() {
        let statistics = FixedStatistics {
            cardinality: 100,
            multiplicity: 4.0,
        };
        let input = scan(&statistics, &["p", "s"]);
        let grouped = ExecutionTree::group_by(
            input,
            vec![var("p")],
            vec![AggregateExpression {
                function: triplan_model::AggregateFunction::Count,
                distinct: false,
                input: None,
                alias: var("c"),
            }],
        )
        .unwrap();
        assert_eq!(grouped.variable_columns(), &[var("p"), var("c")]);
        // 100 rows with multiplicity 4 -> 25 groups.
        assert_eq!(grouped.size_estimate(), 25);
        assert!(grouped.is_sorted_on(&[0]));
    }

    #[test]
    fn variable_columns_form_a_bijection() {
        let statistics = FixedStatistics {
            cardinality: 10,
            multiplicity: 1.0,
        };
        let tree = scan(&statistics, &["x", "y", "z"]);
        let mut seen = HashMap::new();
        for (index, variable) in tree.variable_columns().iter().enumerate() {
            assert_eq!(tree.column_of(variable), Some(index));
            assert!(seen.insert(variable.clone(), index).is_none());
        }
        assert_eq!(seen.len(), tree.arity());
    }
}
