use oxrdf::{NamedNode, Variable};
use std::fmt;

/// A SPARQL property-path expression appearing in predicate position.
///
/// The `Variable` leaf covers plain triples with a variable predicate
/// (`?s ?p ?o`); such a path is trivial and expands to the triple itself.
/// `Transitive` generalizes `+`, `*`, `?` and `{n,m}` to hop bounds
/// `[min, max]` where `max = None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyPath {
    /// A single IRI, e.g. `<http://example.org/p>`.
    Iri(NamedNode),
    /// A variable predicate of a plain triple pattern.
    Variable(Variable),
    /// `a / b`
    Sequence(Box<PropertyPath>, Box<PropertyPath>),
    /// `a | b`
    Alternative(Box<PropertyPath>, Box<PropertyPath>),
    /// `^a`
    Inverse(Box<PropertyPath>),
    /// `a+`, `a*`, `a?`, `a{min,max}`
    Transitive {
        path: Box<PropertyPath>,
        min: u32,
        max: Option<u32>,
    },
}

impl PropertyPath {
    /// Creates a sequence path `a / b`.
    pub fn sequence(a: PropertyPath, b: PropertyPath) -> Self {
        Self::Sequence(Box::new(a), Box::new(b))
    }

    /// Creates an alternative path `a | b`.
    pub fn alternative(a: PropertyPath, b: PropertyPath) -> Self {
        Self::Alternative(Box::new(a), Box::new(b))
    }

    /// Creates an inverse path `^a`.
    pub fn inverse(a: PropertyPath) -> Self {
        Self::Inverse(Box::new(a))
    }

    /// Creates a transitive closure with hop bounds `[min, max]`.
    pub fn transitive(path: PropertyPath, min: u32, max: Option<u32>) -> Self {
        Self::Transitive {
            path: Box::new(path),
            min,
            max,
        }
    }

    /// Creates `a+`.
    pub fn one_or_more(path: PropertyPath) -> Self {
        Self::transitive(path, 1, None)
    }

    /// Creates `a*`.
    pub fn zero_or_more(path: PropertyPath) -> Self {
        Self::transitive(path, 0, None)
    }

    /// True for paths that need no rewriting: a single IRI or a variable.
    pub fn is_trivial(&self) -> bool {
        matches!(self, Self::Iri(_) | Self::Variable(_))
    }

    /// The IRI of a trivial `Iri` path.
    pub fn as_iri(&self) -> Option<&NamedNode> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// The variable of a trivial `Variable` path.
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Self::Variable(variable) => Some(variable),
            _ => None,
        }
    }

    /// Collects the variables mentioned by this path into `target`.
    pub fn variables_into(&self, target: &mut Vec<Variable>) {
        match self {
            Self::Iri(_) => {}
            Self::Variable(variable) => target.push(variable.clone()),
            Self::Sequence(a, b) | Self::Alternative(a, b) => {
                a.variables_into(target);
                b.variables_into(target);
            }
            Self::Inverse(a) => a.variables_into(target),
            Self::Transitive { path, .. } => path.variables_into(target),
        }
    }
}

impl From<NamedNode> for PropertyPath {
    fn from(iri: NamedNode) -> Self {
        Self::Iri(iri)
    }
}

impl From<Variable> for PropertyPath {
    fn from(variable: Variable) -> Self {
        Self::Variable(variable)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "{iri}"),
            Self::Variable(variable) => write!(f, "{variable}"),
            Self::Sequence(a, b) => write!(f, "({a} / {b})"),
            Self::Alternative(a, b) => write!(f, "({a} | {b})"),
            Self::Inverse(a) => write!(f, "^({a})"),
            Self::Transitive { path, min, max } => match (min, max) {
                (0, None) => write!(f, "({path})*"),
                (1, None) => write!(f, "({path})+"),
                (0, Some(1)) => write!(f, "({path})?"),
                (min, None) => write!(f, "({path}){{{min},}}"),
                (min, Some(max)) => write!(f, "({path}){{{min},{max}}}"),
            },
        }
    }
}
