use crate::{PlanResult, PlanningError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag shared between the planner and its caller.
///
/// The planner consults the token between DP rows and before join-candidate
/// generation; on cancellation it aborts with [PlanningError::Cancelled]
/// without producing a partial plan.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that never fires unless [CancellationToken::cancel] is
    /// called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. All clones of this token observe the request.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns [PlanningError::Cancelled] if the token has fired.
    pub fn check(&self) -> PlanResult<()> {
        if self.is_cancelled() {
            Err(PlanningError::Cancelled)
        } else {
            Ok(())
        }
    }
}
