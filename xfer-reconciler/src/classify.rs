//! Error classification and retry budget.
//!
//! Every remote call made by the driver funnels its failure through
//! [`handle_remote_error`], so retry mechanics are identical for create,
//! update, attachment and tag steps.

use std::time::Duration;

use tracing::{error, warn};

use crate::clients::Operation;
use crate::context::ReconciliationContext;
use crate::error::{ErrorKind, Failure, RemoteError};
use crate::step::StepResult;

/// Provider error codes treated as transient.
const TRANSIENT_CODES: &[&str] = &[
    "InternalServiceError",
    "InternalFailure",
    "ServiceUnavailable",
    "ServiceUnavailableException",
];

/// Provider error codes treated as throttling.
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Used for transient errors and for throttling without a hint.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(15),
        }
    }
}

/// What to do with a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Budget was spent; re-invoke after `delay`.
    Retry { delay: Duration },
    Fail(ErrorKind),
}

enum ErrorClass {
    /// Carries the kind surfaced once the budget is exhausted.
    Transient(ErrorKind),
    Throttled(Option<Duration>),
    Terminal(ErrorKind),
    Unclassified,
}

fn class_of(error: &RemoteError) -> ErrorClass {
    match error {
        RemoteError::Conflict(_) => ErrorClass::Transient(ErrorKind::Conflict),
        RemoteError::InternalService(_) | RemoteError::ServiceUnavailable(_) => {
            ErrorClass::Transient(ErrorKind::GeneralServiceFailure)
        }
        RemoteError::Service { code, .. } if TRANSIENT_CODES.contains(&code.as_str()) => {
            ErrorClass::Transient(ErrorKind::GeneralServiceFailure)
        }
        RemoteError::Throttling { retry_after, .. } => ErrorClass::Throttled(*retry_after),
        RemoteError::Service {
            code,
            throttling,
            retry_after,
            ..
        } if *throttling || THROTTLING_CODES.contains(&code.as_str()) => {
            ErrorClass::Throttled(*retry_after)
        }
        RemoteError::AlreadyExists(_) => ErrorClass::Terminal(ErrorKind::AlreadyExists),
        RemoteError::NotFound(_) => ErrorClass::Terminal(ErrorKind::NotFound),
        RemoteError::AccessDenied(_) => ErrorClass::Terminal(ErrorKind::AccessDenied),
        RemoteError::InvalidRequest(_) => ErrorClass::Terminal(ErrorKind::InvalidRequest),
        RemoteError::InvalidContinuationToken(_) => {
            ErrorClass::Terminal(ErrorKind::InvalidContinuationToken)
        }
        RemoteError::Service { .. } => ErrorClass::Unclassified,
    }
}

/// Classify a remote failure, spending retry budget when it is retryable.
pub fn classify(
    error: &RemoteError,
    context: &mut ReconciliationContext,
    policy: &RetryPolicy,
) -> ErrorDecision {
    match class_of(error) {
        ErrorClass::Transient(exhausted) => {
            if context.consume_retry() {
                ErrorDecision::Retry {
                    delay: policy.delay,
                }
            } else {
                ErrorDecision::Fail(exhausted)
            }
        }
        ErrorClass::Throttled(hint) => {
            if context.consume_retry() {
                ErrorDecision::Retry {
                    delay: hint.unwrap_or(policy.delay),
                }
            } else {
                ErrorDecision::Fail(ErrorKind::Throttled)
            }
        }
        ErrorClass::Terminal(kind) => ErrorDecision::Fail(kind),
        ErrorClass::Unclassified => ErrorDecision::Fail(ErrorKind::GeneralServiceFailure),
    }
}

/// Turn a failed remote call into the step outcome, logging it first.
pub fn handle_remote_error<T>(
    operation: Operation,
    identity: &str,
    error: RemoteError,
    mut context: ReconciliationContext,
    policy: &RetryPolicy,
) -> StepResult<T> {
    match classify(&error, &mut context, policy) {
        ErrorDecision::Retry { delay } => {
            warn!(
                "{} failed for {}: {} (retrying in {}s, {} retries left)",
                operation,
                identity,
                error.message(),
                delay.as_secs(),
                context.retries_remaining
            );
            StepResult::in_progress(delay, context)
        }
        ErrorDecision::Fail(kind) => {
            error!(
                "{} failed for {}: {} ({})",
                operation,
                identity,
                error.message(),
                kind
            );
            StepResult::Failed(Failure::new(
                kind,
                format!("{} failed for {}: {}", operation, identity, error.message()),
            ))
        }
    }
}
