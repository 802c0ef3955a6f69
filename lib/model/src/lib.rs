//! This crate contains the Triplan query model: the parsed-query value that the
//! planner consumes, including triples with property-path predicates, filters,
//! aggregates, and solution modifiers.
//!
//! Large portions of the term-level types are re-exported from
//! [Oxigraph](https://github.com/oxigraph/oxigraph).

mod expression;
mod property_path;
mod query;
mod triple;
pub mod vocab;

pub use expression::*;
pub use property_path::*;
pub use query::*;
pub use triple::*;

// Re-export some oxrdf types.
pub use oxiri::Iri;
pub use oxrdf::{
    BlankNode, BlankNodeRef, IriParseError, Literal, LiteralRef, NamedNode,
    NamedNodeRef, Term, TermRef, Variable, VariableNameParseError, VariableRef,
};
pub use spargebra::term::{GroundTerm, NamedNodePattern, TermPattern};

/// Prefix reserved for variables the planner synthesizes (e.g. the midpoints of
/// expanded path sequences). User queries must not contain variables with this
/// prefix.
pub const INTERNAL_VARIABLE_PREFIX: &str = "_triplan_internal_";

/// Returns true if `variable` was synthesized by the planner.
pub fn is_internal_variable(variable: &Variable) -> bool {
    variable.as_str().starts_with(INTERNAL_VARIABLE_PREFIX)
}
