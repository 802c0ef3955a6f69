//! Builtin vocabulary understood by the planner.

/// Triplan's builtin `ql:` namespace.
pub mod ql {
    use oxrdf::NamedNodeRef;

    /// The namespace of the builtin predicates.
    pub const NAMESPACE: &str = "http://triplan.io/ql#";

    /// Selects text records containing a word (or word prefix) for the subject
    /// context variable.
    pub const CONTAINS_WORD: NamedNodeRef<'static> =
        NamedNodeRef::new_unchecked("http://triplan.io/ql#contains-word");

    /// Selects text records mentioning an entity for the subject context
    /// variable.
    pub const CONTAINS_ENTITY: NamedNodeRef<'static> =
        NamedNodeRef::new_unchecked("http://triplan.io/ql#contains-entity");

    /// Relates a subject to every predicate it occurs with. Queries counting
    /// over this predicate are eligible for the precomputed-pattern rewrite.
    pub const HAS_PREDICATE: NamedNodeRef<'static> =
        NamedNodeRef::new_unchecked("http://triplan.io/ql#has-predicate");

    /// Synthesized predicate carried by a collapsed text-clique node.
    pub const TEXT_MATCH: NamedNodeRef<'static> =
        NamedNodeRef::new_unchecked("http://triplan.io/ql#text-match");
}
