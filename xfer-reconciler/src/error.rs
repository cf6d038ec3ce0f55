//! Error types for the reconciler.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::LifecycleState;

/// Failure reported by a remote control-plane call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal service error: {0}")]
    InternalService(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Explicit throttling signal, optionally with a retry-after hint.
    #[error("throttled: {message}")]
    Throttling {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    /// Any other provider error. `throttling` is set when the provider
    /// flags the error as a throttling error.
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        throttling: bool,
        retry_after: Option<Duration>,
    },
}

impl RemoteError {
    /// The original message, without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            RemoteError::Conflict(m)
            | RemoteError::InternalService(m)
            | RemoteError::ServiceUnavailable(m)
            | RemoteError::AlreadyExists(m)
            | RemoteError::NotFound(m)
            | RemoteError::AccessDenied(m)
            | RemoteError::InvalidRequest(m)
            | RemoteError::InvalidContinuationToken(m) => m,
            RemoteError::Throttling { message, .. } | RemoteError::Service { message, .. } => {
                message
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Error kinds surfaced to the invoking framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    RetryableTransient,
    Throttled,
    Conflict,
    NotFound,
    AlreadyExists,
    AccessDenied,
    InvalidRequest,
    InvalidContinuationToken,
    GeneralServiceFailure,
    /// The control plane reported a failed start or stop.
    StabilizationFailed(LifecycleState),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RetryableTransient => write!(f, "RetryableTransient"),
            ErrorKind::Throttled => write!(f, "Throttled"),
            ErrorKind::Conflict => write!(f, "Conflict"),
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::AlreadyExists => write!(f, "AlreadyExists"),
            ErrorKind::AccessDenied => write!(f, "AccessDenied"),
            ErrorKind::InvalidRequest => write!(f, "InvalidRequest"),
            ErrorKind::InvalidContinuationToken => write!(f, "InvalidContinuationToken"),
            ErrorKind::GeneralServiceFailure => write!(f, "GeneralServiceFailure"),
            ErrorKind::StabilizationFailed(state) => write!(f, "StabilizationFailed({state})"),
        }
    }
}

/// Terminal outcome of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
