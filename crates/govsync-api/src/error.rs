//! Remote API error types.
//!
//! Every failure coming back from the control plane is turned into an
//! [`ApiError`] carrying an explicit [`ApiErrorKind`]. Retry and conflict
//! decisions are made on the kind, never on the message text.

use std::fmt;
use std::time::Duration;

/// Structured classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// The object (or a dependency of the request) does not exist.
    NotFound,
    /// The object already exists or a request for it is already pending.
    Conflict,
    /// The backend asked us to slow down (429).
    Throttled,
    /// 5xx, connection resets, timeouts, replication lag.
    Transient,
    /// 401/403.
    Unauthorized,
    /// Malformed request or business rule violation.
    Validation,
    /// Anything else that retrying will not fix.
    Fatal,
}

impl ApiErrorKind {
    /// Kind implied by an HTTP status code alone.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => Self::NotFound,
            409 | 412 => Self::Conflict,
            429 => Self::Throttled,
            401 | 403 => Self::Unauthorized,
            400 | 422 => Self::Validation,
            408 | 500..=599 => Self::Transient,
            _ => Self::Fatal,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Throttled => write!(f, "throttled"),
            Self::Transient => write!(f, "transient"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Validation => write!(f, "validation"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A failed call against the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// HTTP status, `None` for transport failures.
    pub status: Option<u16>,
    /// Backend error code from the `{error: {code, message}}` envelope.
    pub code: Option<String>,
    pub message: String,
    /// Server-provided `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Error for an HTTP response, kind derived from the status.
    #[must_use]
    pub fn from_response(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::from_status(status),
            status: Some(status),
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message).with_status(404)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Conflict, message).with_status(409)
    }

    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Throttled, message).with_status(429)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transient, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unauthorized, message).with_status(403)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Validation, message).with_status(400)
    }

    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Fatal, message)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ApiErrorKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind == ApiErrorKind::Conflict
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Throttled | ApiErrorKind::Transient)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "HTTP {status} ")?;
        }
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ApiErrorKind::Transient
        } else {
            ApiErrorKind::Fatal
        };
        let mut api = Self::new(kind, err.to_string());
        if let Some(status) = err.status() {
            api.status = Some(status.as_u16());
        }
        api
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::fatal(format!("invalid JSON from backend: {err}"))
    }
}
