//! Backend-specific refinement of [`ApiErrorKind`].
//!
//! Status codes alone do not tell a replication-lag 404 from a real one, nor
//! a 400 "already exists" from a malformed payload. The classifier refines the
//! status-derived kind with backend error codes first. Message fragments are a
//! last resort, consulted only for 400/404 responses, because the control
//! plane exposes no structured transient flag for replication lag.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassifier {
    /// Backend codes that always mean "try again".
    #[serde(default = "default_transient_codes")]
    pub transient_codes: Vec<String>,
    /// Backend codes that mean the object already exists or is pending.
    #[serde(default = "default_conflict_codes")]
    pub conflict_codes: Vec<String>,
    /// Message fragments of 400/404 responses caused by replication lag.
    #[serde(default = "default_replication_signatures")]
    pub replication_signatures: Vec<String>,
    /// Message fragments of 400 responses that report an existing object.
    #[serde(default = "default_conflict_signatures")]
    pub conflict_signatures: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_transient_codes() -> Vec<String> {
    strings(&[
        "ServiceUnavailable",
        "InternalServerError",
        "GatewayTimeout",
        "UnknownError",
    ])
}

fn default_conflict_codes() -> Vec<String> {
    strings(&[
        "Conflict",
        "AlreadyExists",
        "ResourceAlreadyExists",
        "PendingRequestExists",
        "ExistingOpenRequest",
    ])
}

fn default_replication_signatures() -> Vec<String> {
    strings(&["replication", "does not exist yet", "not yet available", "temporarily unavailable"])
}

fn default_conflict_signatures() -> Vec<String> {
    strings(&["already exists", "already pending", "pending request"])
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            transient_codes: default_transient_codes(),
            conflict_codes: default_conflict_codes(),
            replication_signatures: default_replication_signatures(),
            conflict_signatures: default_conflict_signatures(),
        }
    }
}

impl ErrorClassifier {
    /// Refined kind for `err`.
    #[must_use]
    pub fn classify(&self, err: &ApiError) -> ApiErrorKind {
        // Throttling carries Retry-After; never downgrade it.
        if err.kind == ApiErrorKind::Throttled {
            return ApiErrorKind::Throttled;
        }
        if let Some(code) = err.code.as_deref() {
            if contains_ignore_case(&self.transient_codes, code) {
                return ApiErrorKind::Transient;
            }
            if contains_ignore_case(&self.conflict_codes, code) {
                return ApiErrorKind::Conflict;
            }
        }

        let message = err.message.to_ascii_lowercase();
        match err.status {
            Some(400) | Some(404) if mentions(&self.replication_signatures, &message) => {
                ApiErrorKind::Transient
            }
            Some(400) if mentions(&self.conflict_signatures, &message) => ApiErrorKind::Conflict,
            _ => err.kind,
        }
    }

    /// Returns `err` with its kind replaced by the refined one.
    #[must_use]
    pub fn refine(&self, err: ApiError) -> ApiError {
        let kind = self.classify(&err);
        err.with_kind(kind)
    }

    pub fn validate(&self) -> Result<(), String> {
        let lists = [
            ("transient_codes", &self.transient_codes),
            ("conflict_codes", &self.conflict_codes),
            ("replication_signatures", &self.replication_signatures),
            ("conflict_signatures", &self.conflict_signatures),
        ];
        for (name, list) in lists {
            if list.iter().any(|s| s.trim().is_empty()) {
                return Err(format!("classifier.{name} must not contain empty entries"));
            }
        }
        Ok(())
    }
}

fn contains_ignore_case(list: &[String], code: &str) -> bool {
    list.iter().any(|c| c.eq_ignore_ascii_case(code))
}

fn mentions(signatures: &[String], message: &str) -> bool {
    signatures
        .iter()
        .any(|s| message.contains(&s.to_ascii_lowercase()))
}
