use crate::vocab::ql;
use crate::PropertyPath;
use oxrdf::Variable;
use spargebra::term::TermPattern;
use std::fmt;

/// A triple pattern whose predicate position holds a [PropertyPath].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparqlTriple {
    pub subject: TermPattern,
    pub predicate: PropertyPath,
    pub object: TermPattern,
}

impl SparqlTriple {
    /// Creates a new [SparqlTriple].
    pub fn new(
        subject: impl Into<TermPattern>,
        predicate: impl Into<PropertyPath>,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// All variables of this triple, in subject, predicate, object order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut result = Vec::new();
        if let Some(variable) = pattern_variable(&self.subject) {
            result.push(variable.clone());
        }
        self.predicate.variables_into(&mut result);
        if let Some(variable) = pattern_variable(&self.object) {
            result.push(variable.clone());
        }
        result
    }

    /// True if the predicate is one of the builtin text-search predicates.
    ///
    /// The subject of such a triple is a context variable and the triple is
    /// part of a text clique.
    pub fn is_text_operation(&self) -> bool {
        self.predicate
            .as_iri()
            .is_some_and(|iri| *iri == ql::CONTAINS_WORD || *iri == ql::CONTAINS_ENTITY)
    }

    /// The word part of a `ql:contains-word` triple: the lexical form of its
    /// object literal.
    pub fn word_part(&self) -> Option<&str> {
        match self.predicate.as_iri() {
            Some(iri) if *iri == ql::CONTAINS_WORD => {}
            _ => return None,
        }
        match &self.object {
            TermPattern::Literal(literal) => Some(literal.value()),
            _ => None,
        }
    }
}

impl fmt::Display for SparqlTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// The variable bound by a term pattern, if any.
pub fn pattern_variable(pattern: &TermPattern) -> Option<&Variable> {
    match pattern {
        TermPattern::Variable(variable) => Some(variable),
        _ => None,
    }
}
