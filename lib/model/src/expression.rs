use crate::TextPosition;
use oxrdf::{Literal, NamedNode, Variable};
use std::collections::BTreeSet;
use std::fmt;

/// A boolean expression over query variables.
///
/// The planner never evaluates expressions. It only needs their free variables
/// (to decide where a filter can be applied) and a stable textual form (for
/// plan cache keys), so the sum is deliberately small.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Variable(Variable),
    NamedNode(NamedNode),
    Literal(Literal),
    Or(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    Less(Box<Expression>, Box<Expression>),
    LessOrEqual(Box<Expression>, Box<Expression>),
    Greater(Box<Expression>, Box<Expression>),
    GreaterOrEqual(Box<Expression>, Box<Expression>),
    Bound(Variable),
    Regex {
        input: Box<Expression>,
        pattern: String,
        flags: Option<String>,
    },
}

impl Expression {
    pub fn and(a: Expression, b: Expression) -> Self {
        Self::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Expression, b: Expression) -> Self {
        Self::Or(Box::new(a), Box::new(b))
    }

    pub fn equal(a: Expression, b: Expression) -> Self {
        Self::Equal(Box::new(a), Box::new(b))
    }

    pub fn greater(a: Expression, b: Expression) -> Self {
        Self::Greater(Box::new(a), Box::new(b))
    }

    pub fn less(a: Expression, b: Expression) -> Self {
        Self::Less(Box::new(a), Box::new(b))
    }

    /// The set of variables occurring free in this expression.
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut result = BTreeSet::new();
        self.variables_into(&mut result);
        result
    }

    fn variables_into(&self, target: &mut BTreeSet<Variable>) {
        match self {
            Self::Variable(variable) | Self::Bound(variable) => {
                target.insert(variable.clone());
            }
            Self::NamedNode(_) | Self::Literal(_) => {}
            Self::Or(a, b)
            | Self::And(a, b)
            | Self::Equal(a, b)
            | Self::NotEqual(a, b)
            | Self::Less(a, b)
            | Self::LessOrEqual(a, b)
            | Self::Greater(a, b)
            | Self::GreaterOrEqual(a, b) => {
                a.variables_into(target);
                b.variables_into(target);
            }
            Self::Not(a) => a.variables_into(target),
            Self::Regex { input, .. } => input.variables_into(target),
        }
    }
}

impl From<Variable> for Expression {
    fn from(variable: Variable) -> Self {
        Self::Variable(variable)
    }
}

impl From<Literal> for Expression {
    fn from(literal: Literal) -> Self {
        Self::Literal(literal)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(v) => write!(f, "{v}"),
            Self::NamedNode(n) => write!(f, "{n}"),
            Self::Literal(l) => write!(f, "{l}"),
            Self::Or(a, b) => write!(f, "({a} || {b})"),
            Self::And(a, b) => write!(f, "({a} && {b})"),
            Self::Not(a) => write!(f, "!({a})"),
            Self::Equal(a, b) => write!(f, "({a} = {b})"),
            Self::NotEqual(a, b) => write!(f, "({a} != {b})"),
            Self::Less(a, b) => write!(f, "({a} < {b})"),
            Self::LessOrEqual(a, b) => write!(f, "({a} <= {b})"),
            Self::Greater(a, b) => write!(f, "({a} > {b})"),
            Self::GreaterOrEqual(a, b) => write!(f, "({a} >= {b})"),
            Self::Bound(v) => write!(f, "BOUND({v})"),
            Self::Regex {
                input,
                pattern,
                flags,
            } => match flags {
                Some(flags) => write!(f, "REGEX({input}, \"{pattern}\", \"{flags}\")"),
                None => write!(f, "REGEX({input}, \"{pattern}\")"),
            },
        }
    }
}

/// A FILTER constraint of a graph pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparqlFilter {
    pub expression: Expression,
    /// Position of the FILTER keyword in the query text, when the parser
    /// provides one.
    pub position: Option<TextPosition>,
}

impl SparqlFilter {
    /// Creates a new [SparqlFilter] without position information.
    pub fn new(expression: Expression) -> Self {
        Self {
            expression,
            position: None,
        }
    }

    /// The free variables of the filter expression.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.expression.variables()
    }
}

impl fmt::Display for SparqlFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FILTER{}", self.expression)
    }
}

/// An aggregate function of a SELECT or HAVING clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Sample,
    GroupConcat { separator: Option<String> },
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "COUNT"),
            Self::Sum => write!(f, "SUM"),
            Self::Min => write!(f, "MIN"),
            Self::Max => write!(f, "MAX"),
            Self::Avg => write!(f, "AVG"),
            Self::Sample => write!(f, "SAMPLE"),
            Self::GroupConcat { .. } => write!(f, "GROUP_CONCAT"),
        }
    }
}

/// An aggregate of the SELECT clause, e.g. `(COUNT(?x) AS ?c)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateExpression {
    pub function: AggregateFunction,
    pub distinct: bool,
    /// The aggregated variable; `None` stands for `*`.
    pub input: Option<Variable>,
    /// The variable the aggregate result is bound to.
    pub alias: Variable,
}

impl fmt::Display for AggregateExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        match &self.input {
            Some(input) => {
                write!(f, "({}({distinct}{input}) AS {})", self.function, self.alias)
            }
            None => write!(f, "({}({distinct}*) AS {})", self.function, self.alias),
        }
    }
}
