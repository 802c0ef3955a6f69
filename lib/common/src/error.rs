use triplan_model::{TextPosition, Variable};

/// An error raised while planning a query.
///
/// All variants are fatal to the current planning call; the planner never
/// retries internally and never returns a partial plan.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlanningError {
    /// The parsed query is structurally unplannable: a malformed property
    /// path, an unknown aggregate, misuse of a builtin predicate, or a basic
    /// graph pattern exceeding the node limit.
    #[error("structural error in query: {message}{}", format_position(.position))]
    Structural {
        message: String,
        position: Option<TextPosition>,
    },
    /// A variable referenced by SELECT, ORDER BY, GROUP BY or FILTER is not
    /// bound by any plan branch.
    #[error("variable {variable} is not bound in the query{}", format_position(.position))]
    UnboundVariable {
        variable: Variable,
        position: Option<TextPosition>,
    },
    /// The index statistics capability failed or returned an impossible value.
    #[error("index statistics unavailable or invalid: {0}")]
    IndexCapability(String),
    /// The cancellation token fired.
    #[error("query planning was cancelled")]
    Cancelled,
    /// An internal invariant failed. This indicates a bug in the planner.
    #[error("internal planner invariant violated: {0}")]
    Internal(String),
}

impl PlanningError {
    /// Builds a [PlanningError::Structural] without position information.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
            position: None,
        }
    }

    /// Builds a [PlanningError::UnboundVariable] without position information.
    pub fn unbound(variable: Variable) -> Self {
        Self::UnboundVariable {
            variable,
            position: None,
        }
    }

    /// Shorthand for failing with a [PlanningError::Internal].
    pub fn internal<T>(message: impl Into<String>) -> Result<T, Self> {
        Err(Self::Internal(message.into()))
    }
}

fn format_position(position: &Option<TextPosition>) -> String {
    match position {
        Some(position) => format!(" ({position})"),
        None => String::new(),
    }
}
