//! Outcome of a single reconciliation invocation.

use std::time::Duration;

use crate::context::ReconciliationContext;
use crate::error::{ErrorKind, Failure};

/// Result of one unit of work.
///
/// `InProgress` hands the updated context back to the caller, which must
/// persist it and re-invoke after `delay`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult<T> {
    Complete(T),
    InProgress {
        delay: Duration,
        context: ReconciliationContext,
    },
    Failed(Failure),
}

impl<T> StepResult<T> {
    pub fn in_progress(delay: Duration, context: ReconciliationContext) -> Self {
        StepResult::InProgress { delay, context }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        StepResult::Failed(Failure::new(kind, message))
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, StepResult::Complete(_))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, StepResult::InProgress { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepResult::Failed(_))
    }

    pub fn context(&self) -> Option<&ReconciliationContext> {
        match self {
            StepResult::InProgress { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            StepResult::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StepResult<U> {
        self.then(|v| StepResult::Complete(f(v)))
    }

    /// Chain the next stage. `InProgress` and `Failed` short-circuit.
    pub fn then<U>(self, f: impl FnOnce(T) -> StepResult<U>) -> StepResult<U> {
        match self {
            StepResult::Complete(v) => f(v),
            StepResult::InProgress { delay, context } => StepResult::InProgress { delay, context },
            StepResult::Failed(failure) => StepResult::Failed(failure),
        }
    }
}

/// Unwrap a `Complete` value or return the short-circuiting outcome from the
/// enclosing function. The async counterpart of [`StepResult::then`].
#[macro_export]
macro_rules! proceed {
    ($step:expr) => {
        match $step {
            $crate::step::StepResult::Complete(value) => value,
            $crate::step::StepResult::InProgress { delay, context } => {
                return $crate::step::StepResult::InProgress { delay, context }
            }
            $crate::step::StepResult::Failed(failure) => {
                return $crate::step::StepResult::Failed(failure)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_then_short_circuits_failures() {
        let failed: StepResult<u32> = StepResult::failed(ErrorKind::NotFound, "gone");
        let mut called = false;
        let out = failed.then(|v| {
            called = true;
            StepResult::Complete(v + 1)
        });
        assert!(!called);
        assert_eq!(out.failure().map(|f| f.kind), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_then_passes_context_through() {
        let ctx = ReconciliationContext::new(3);
        let pending: StepResult<u32> = StepResult::in_progress(Duration::from_secs(5), ctx.clone());
        let out = pending.map(|v| v.to_string());
        assert_eq!(out.context(), Some(&ctx));
    }

    #[test]
    fn test_then_chains_complete() {
        let out = StepResult::Complete(2).then(|v| StepResult::Complete(v * 10));
        assert_eq!(out, StepResult::Complete(20));
    }
}
