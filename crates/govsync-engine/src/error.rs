//! Reconciliation error types.
//!
//! Every variant names the operation and the natural key it failed on, and,
//! where the backend answered, carries the last [`ApiError`] with its code
//! and message. Exhausted retries always surface as a named variant.

use std::fmt;

use govsync_api::{ApiError, ApiErrorKind};

use crate::backoff::RetryError;

/// Errors that can occur while converging one resource.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    /// The object (or a dependency) never became visible.
    #[error("{operation} {key}: still not found after {attempts} attempts ({last})")]
    NotFoundAfterRetries {
        operation: String,
        key: String,
        attempts: u32,
        last: ApiError,
    },

    /// A conflict the engine could not turn into a lookup.
    #[error("{operation} {key}: conflict: {source}")]
    Conflict {
        operation: String,
        key: String,
        source: ApiError,
    },

    #[error("{operation} {key}: not authorized: {source}")]
    Unauthorized {
        operation: String,
        key: String,
        source: ApiError,
    },

    /// Throttling outlasted the retry budget.
    #[error("{operation} {key}: throttled, gave up after {attempts} attempts ({last})")]
    Throttled {
        operation: String,
        key: String,
        attempts: u32,
        last: ApiError,
    },

    /// The backend or the engine rejected the desired state.
    #[error("{operation} {key}: validation failed: {message}")]
    ValidationFailed {
        operation: String,
        key: String,
        message: String,
    },

    #[error("{key}: request {request_id} did not materialize within {waited_ms} ms")]
    MaterializationTimedOut {
        key: String,
        request_id: String,
        waited_ms: u64,
    },

    /// Transient failures outlasted the retry budget.
    #[error("{operation} {key}: gave up after {attempts} attempts ({last})")]
    RetriesExhausted {
        operation: String,
        key: String,
        attempts: u32,
        last: ApiError,
    },

    #[error("{kind} {key}: {count} remote objects match the natural key")]
    AmbiguousMatch {
        kind: String,
        key: String,
        count: usize,
    },

    #[error("policy {key}: {message}")]
    PolicyPatchFailed { key: String, message: String },

    #[error("{key}: invalid desired state: {message}")]
    InvalidDesired { key: String, message: String },

    #[error("{operation} {key}: cancelled")]
    Cancelled { operation: String, key: String },

    /// Any other backend failure.
    #[error("{operation} {key}: {source}")]
    Remote {
        operation: String,
        key: String,
        source: ApiError,
    },
}

impl ReconcileError {
    /// Maps a single, non-retried API failure.
    pub fn from_api(operation: &str, key: impl fmt::Display, err: ApiError) -> Self {
        let operation = operation.to_string();
        let key = key.to_string();
        match err.kind {
            ApiErrorKind::Conflict => Self::Conflict {
                operation,
                key,
                source: err,
            },
            ApiErrorKind::Unauthorized => Self::Unauthorized {
                operation,
                key,
                source: err,
            },
            ApiErrorKind::Validation => Self::ValidationFailed {
                operation,
                key,
                message: err.to_string(),
            },
            _ => Self::Remote {
                operation,
                key,
                source: err,
            },
        }
    }

    /// Maps the result of a backoff-wrapped call.
    pub fn from_retry(operation: &str, key: impl fmt::Display, err: RetryError<ApiError>) -> Self {
        let operation_name = operation.to_string();
        let key_name = key.to_string();
        match err {
            RetryError::Failed { error, .. } => Self::from_api(operation, key_name, error),
            RetryError::Exhausted { attempts, last } => match last.kind {
                ApiErrorKind::NotFound => Self::NotFoundAfterRetries {
                    operation: operation_name,
                    key: key_name,
                    attempts,
                    last,
                },
                ApiErrorKind::Throttled => Self::Throttled {
                    operation: operation_name,
                    key: key_name,
                    attempts,
                    last,
                },
                _ => Self::RetriesExhausted {
                    operation: operation_name,
                    key: key_name,
                    attempts,
                    last,
                },
            },
            RetryError::Cancelled { .. } => Self::Cancelled {
                operation: operation_name,
                key: key_name,
            },
        }
    }

    pub fn invalid(key: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::InvalidDesired {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn validation(operation: &str, key: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            operation: operation.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled(operation: &str, key: impl fmt::Display) -> Self {
        Self::Cancelled {
            operation: operation.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if a later run may succeed without changing the desired state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NotFound | ErrorCategory::Throttled | ErrorCategory::Timeout
        ) || matches!(self, Self::RetriesExhausted { .. })
    }

    /// The last backend error, when there was one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::NotFoundAfterRetries { last, .. }
            | Self::Throttled { last, .. }
            | Self::RetriesExhausted { last, .. } => Some(last),
            Self::Conflict { source, .. }
            | Self::Unauthorized { source, .. }
            | Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFoundAfterRetries { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } | Self::AmbiguousMatch { .. } => ErrorCategory::Conflict,
            Self::Unauthorized { .. } => ErrorCategory::Unauthorized,
            Self::Throttled { .. } => ErrorCategory::Throttled,
            Self::ValidationFailed { .. } | Self::InvalidDesired { .. } => {
                ErrorCategory::Validation
            }
            Self::MaterializationTimedOut { .. } => ErrorCategory::Timeout,
            Self::PolicyPatchFailed { .. } => ErrorCategory::Policy,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::RetriesExhausted { .. } | Self::Remote { .. } => ErrorCategory::Remote,
        }
    }
}

/// Categories of reconciliation errors for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Unauthorized,
    Throttled,
    Validation,
    Timeout,
    Policy,
    Cancelled,
    Remote,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Throttled => write!(f, "throttled"),
            Self::Validation => write!(f, "validation"),
            Self::Timeout => write!(f, "timeout"),
            Self::Policy => write!(f, "policy"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Remote => write!(f, "remote"),
        }
    }
}
