//! Shared plumbing of the Triplan planner: the error type, the node/filter
//! bitsets, cooperative cancellation, and the statistics capability through
//! which the planner talks to the physical index.

mod bitset;
mod cancellation;
pub mod error;
mod statistics;

pub use bitset::BitSet64;
pub use cancellation::CancellationToken;
pub use error::PlanningError;
pub use statistics::{
    IndexStatistics, Permutation, PredicateStats, ScanConstraints, TripleComponent,
};

/// The result type of all planning operations.
pub type PlanResult<T> = Result<T, PlanningError>;
