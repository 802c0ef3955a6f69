use crate::{AggregateExpression, Expression, SparqlFilter, SparqlTriple};
use oxrdf::{NamedNode, Variable};
use spargebra::term::{GroundTerm, TermPattern};
use std::fmt;

/// A position in the query text (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextPosition {
    pub line: u64,
    pub column: u64,
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A declared prefix of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub prefix: String,
    pub iri: NamedNode,
}

/// A single ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub variable: Variable,
    pub descending: bool,
}

impl OrderKey {
    pub fn ascending(variable: Variable) -> Self {
        Self {
            variable,
            descending: false,
        }
    }

    pub fn descending(variable: Variable) -> Self {
        Self {
            variable,
            descending: true,
        }
    }
}

/// The SELECT clause: projected variables plus aggregate expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectClause {
    pub variables: Vec<Variable>,
    pub aggregates: Vec<AggregateExpression>,
}

/// The head of the query: either a projection or a CONSTRUCT template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryClause {
    Select(SelectClause),
    Construct(Vec<SparqlTriple>),
}

impl QueryClause {
    /// The select clause, if this is a SELECT query.
    pub fn as_select(&self) -> Option<&SelectClause> {
        match self {
            Self::Select(select) => Some(select),
            Self::Construct(_) => None,
        }
    }

    /// The variables the result must bind: projected variables for SELECT,
    /// template variables for CONSTRUCT.
    pub fn visible_variables(&self) -> Vec<Variable> {
        match self {
            Self::Select(select) => select.variables.clone(),
            Self::Construct(template) => {
                let mut result = Vec::new();
                for triple in template {
                    for variable in triple.variables() {
                        if !result.contains(&variable) {
                            result.push(variable);
                        }
                    }
                }
                result
            }
        }
    }
}

/// One operation of a [GraphPattern].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphPatternOperation {
    /// A basic graph pattern: a conjunctive list of triples.
    Bgp { triples: Vec<SparqlTriple> },
    /// `OPTIONAL { ... }`
    Optional(GraphPattern),
    /// `{ ... } UNION { ... } UNION ...`
    Union(Vec<GraphPattern>),
    /// `MINUS { ... }`
    Minus(GraphPattern),
    /// A nested SELECT.
    Subquery(Box<ParsedQuery>),
    /// `BIND(expr AS ?var)`
    Bind {
        expression: Expression,
        variable: Variable,
    },
    /// `VALUES (?v ...) { ... }`; an unbound cell is `None`.
    Values {
        variables: Vec<Variable>,
        bindings: Vec<Vec<Option<GroundTerm>>>,
    },
    /// `FILTER(...)`
    Filter(SparqlFilter),
    /// A transitive closure over an expanded path with hop bounds
    /// `[min, max]`, `max = None` meaning unbounded. Produced by the
    /// property-path expander, never by a parser. `inner` computes one hop,
    /// binding `inner_begin` and `inner_end`.
    TransitivePath {
        subject: TermPattern,
        object: TermPattern,
        min: u32,
        max: Option<u32>,
        inner: GraphPattern,
        inner_begin: Variable,
        inner_end: Variable,
    },
}

/// An ordered sequence of graph-pattern operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphPattern {
    pub operations: Vec<GraphPatternOperation>,
}

impl GraphPattern {
    /// Creates a pattern holding a single basic graph pattern.
    pub fn bgp(triples: Vec<SparqlTriple>) -> Self {
        Self {
            operations: vec![GraphPatternOperation::Bgp { triples }],
        }
    }

    /// Creates a pattern from a sequence of operations.
    pub fn from_operations(operations: Vec<GraphPatternOperation>) -> Self {
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// All variables bound by some operation of this pattern (filters and
    /// MINUS bind nothing).
    pub fn bound_variables(&self) -> Vec<Variable> {
        let mut result = Vec::new();
        for operation in &self.operations {
            collect_bound_variables(operation, &mut result);
        }
        result
    }
}

fn collect_bound_variables(operation: &GraphPatternOperation, target: &mut Vec<Variable>) {
    let mut push = |variable: Variable| {
        if !target.contains(&variable) {
            target.push(variable);
        }
    };
    match operation {
        GraphPatternOperation::Bgp { triples } => {
            for triple in triples {
                for variable in triple.variables() {
                    push(variable);
                }
            }
        }
        GraphPatternOperation::Optional(pattern) => {
            for variable in pattern.bound_variables() {
                push(variable);
            }
        }
        GraphPatternOperation::Union(patterns) => {
            for pattern in patterns {
                for variable in pattern.bound_variables() {
                    push(variable);
                }
            }
        }
        GraphPatternOperation::Minus(_) | GraphPatternOperation::Filter(_) => {}
        GraphPatternOperation::Subquery(query) => {
            for variable in query.clause.visible_variables() {
                push(variable);
            }
        }
        GraphPatternOperation::Bind { variable, .. } => push(variable.clone()),
        GraphPatternOperation::Values { variables, .. } => {
            for variable in variables {
                push(variable.clone());
            }
        }
        GraphPatternOperation::TransitivePath {
            subject, object, ..
        } => {
            if let TermPattern::Variable(variable) = subject {
                push(variable.clone());
            }
            if let TermPattern::Variable(variable) = object {
                push(variable.clone());
            }
        }
    }
}

/// A parsed SPARQL query as handed to the planner. No lexing or parsing
/// happens in this repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub prefixes: Vec<Prefix>,
    pub clause: QueryClause,
    pub root: GraphPattern,
    pub distinct: bool,
    pub order_by: Vec<OrderKey>,
    pub group_by: Vec<Variable>,
    pub having: Vec<SparqlFilter>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Raw TEXTLIMIT argument; validated by the planner.
    pub text_limit: Option<String>,
}

impl ParsedQuery {
    /// Creates a plain `SELECT ?a ?b WHERE { ... }` query without modifiers.
    pub fn select(variables: Vec<Variable>, root: GraphPattern) -> Self {
        Self {
            prefixes: Vec::new(),
            clause: QueryClause::Select(SelectClause {
                variables,
                aggregates: Vec::new(),
            }),
            root,
            distinct: false,
            order_by: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            limit: None,
            offset: 0,
            text_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PropertyPath;

    fn var(name: &str) -> Variable {
        Variable::new(name).unwrap()
    }

    fn iri(s: &str) -> NamedNode {
        NamedNode::new(s).unwrap()
    }

    #[test]
    fn bound_variables_skip_minus_and_filters() {
        let pattern = GraphPattern::from_operations(vec![
            GraphPatternOperation::Bgp {
                triples: vec![SparqlTriple::new(
                    var("x"),
                    iri("http://example.org/p"),
                    var("y"),
                )],
            },
            GraphPatternOperation::Minus(GraphPattern::bgp(vec![SparqlTriple::new(
                var("x"),
                iri("http://example.org/q"),
                var("hidden"),
            )])),
            GraphPatternOperation::Filter(SparqlFilter::new(Expression::Bound(var("z")))),
        ]);

        let bound = pattern.bound_variables();
        assert_eq!(bound, vec![var("x"), var("y")]);
    }

    #[test]
    fn transitive_path_binds_endpoint_variables() {
        let pattern = GraphPattern::from_operations(vec![
            GraphPatternOperation::TransitivePath {
                subject: TermPattern::Variable(var("a")),
                object: TermPattern::Variable(var("b")),
                min: 1,
                max: None,
                inner: GraphPattern::bgp(vec![SparqlTriple::new(
                    var("begin"),
                    PropertyPath::Iri(iri("http://example.org/p")),
                    var("end"),
                )]),
                inner_begin: var("begin"),
                inner_end: var("end"),
            },
        ]);
        assert_eq!(pattern.bound_variables(), vec![var("a"), var("b")]);
    }
}
