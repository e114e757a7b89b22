//! Natural key to remote object lookup.
//!
//! Server-side filtering narrows the candidates; the exact decision is always
//! made client side, because backends match case-insensitively and some
//! ignore parts of the filter.

use govsync_api::{ApiError, ApiErrorKind, DynRemoteApi, ErrorClassifier, Filter, ListQuery};
use govsync_core::{NaturalKey, RemoteResource, ResourceKind};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backoff::{RetryDecision, RetryPolicy};
use crate::error::ReconcileError;

/// Outcome of one unretried lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(RemoteResource),
    Missing,
    Ambiguous(usize),
}

pub struct Resolver {
    api: DynRemoteApi,
    classifier: ErrorClassifier,
    retry: RetryPolicy,
}

impl Resolver {
    pub fn new(api: DynRemoteApi, classifier: ErrorClassifier, retry: RetryPolicy) -> Self {
        Self {
            api,
            classifier,
            retry,
        }
    }

    /// The list query used to find `key`.
    pub fn query_for(kind: &ResourceKind, key: &NaturalKey) -> ListQuery {
        let mut filter = Filter::eq(&kind.key_field, &key.name);
        if let (Some(scope), Some(parent)) = (&kind.parent, &key.parent)
            && let Some(field) = &scope.filter_field
        {
            filter = filter.and_eq(field, parent);
        }

        let mut select = kind.select.clone();
        if !select.is_empty() {
            let mut required = vec!["id".to_string(), kind.key_field.clone()];
            if let Some(scope) = &kind.parent
                && let Some(root) = scope.remote_path.split('.').next()
            {
                required.push(root.to_string());
            }
            for field in required {
                if !select.contains(&field) {
                    select.push(field);
                }
            }
        }
        ListQuery::filtered(filter).with_select(&select)
    }

    /// One lookup attempt. Errors come back refined by the classifier.
    pub async fn find_once(&self, kind: &ResourceKind, key: &NaturalKey) -> Result<Lookup, ApiError> {
        let query = Self::query_for(kind, key);
        let rows = match self.api.list(&kind.collection, &query).await {
            Ok(rows) => rows,
            Err(err) => {
                let err = self.classifier.refine(err);
                if err.kind == ApiErrorKind::NotFound {
                    return Ok(Lookup::Missing);
                }
                return Err(err);
            }
        };

        let server_scoped = kind
            .parent
            .as_ref()
            .is_some_and(|scope| scope.filter_field.is_some());
        let mut matches: Vec<RemoteResource> = rows
            .into_iter()
            .filter(|row| is_exact_match(kind, key, row, server_scoped))
            .filter_map(RemoteResource::from_value)
            .collect();

        debug!(
            kind = %kind.name,
            key = %key,
            matches = matches.len(),
            "lookup"
        );
        match matches.len() {
            0 => Ok(Lookup::Missing),
            1 => Ok(matches.pop().map_or(Lookup::Missing, Lookup::Found)),
            n => Ok(Lookup::Ambiguous(n)),
        }
    }

    /// Finds `key`, retrying transient failures. `Ok(None)` means "not there (yet)".
    pub async fn find(
        &self,
        kind: &ResourceKind,
        key: &NaturalKey,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteResource>, ReconcileError> {
        let lookup = self
            .retry
            .run("lookup", cancel, retry_transient, |_| self.find_once(kind, key))
            .await
            .map_err(|e| ReconcileError::from_retry("lookup", key, e))?;
        into_option(kind, key, lookup)
    }

    /// Finds an object the backend claims exists but may not list yet.
    ///
    /// Absence is retried like a transient failure and ends in
    /// `NotFoundAfterRetries`.
    pub async fn find_eventually(
        &self,
        kind: &ResourceKind,
        key: &NaturalKey,
        cancel: &CancellationToken,
    ) -> Result<RemoteResource, ReconcileError> {
        let lookup = self
            .retry
            .run("lookup", cancel, retry_transient_or_missing, |_| async move {
                match self.find_once(kind, key).await {
                    Ok(Lookup::Missing) => Err(ApiError::not_found(format!(
                        "{} '{key}' is not listable yet",
                        kind.name
                    ))),
                    other => other,
                }
            })
            .await
            .map_err(|e| ReconcileError::from_retry("lookup", key, e))?;
        into_option(kind, key, lookup)?.ok_or_else(|| {
            ReconcileError::from_api(
                "lookup",
                key,
                ApiError::not_found(format!("{} '{key}' not found", kind.name)),
            )
        })
    }
}

fn into_option(
    kind: &ResourceKind,
    key: &NaturalKey,
    lookup: Lookup,
) -> Result<Option<RemoteResource>, ReconcileError> {
    match lookup {
        Lookup::Found(remote) => Ok(Some(remote)),
        Lookup::Missing => Ok(None),
        Lookup::Ambiguous(count) => Err(ReconcileError::AmbiguousMatch {
            kind: kind.name.clone(),
            key: key.to_string(),
            count,
        }),
    }
}

/// Exact key equality, plus parent equality for scoped kinds.
///
/// An object without a parent reference is accepted only when the server
/// already filtered on the parent.
fn is_exact_match(kind: &ResourceKind, key: &NaturalKey, row: &Value, server_scoped: bool) -> bool {
    let Some(object) = row.as_object() else {
        return false;
    };
    if kind.key_of(object) != Some(key.name.as_str()) {
        return false;
    }
    match (&kind.parent, &key.parent) {
        (Some(_), Some(parent)) => match kind.parent_of(object) {
            Some(actual) => actual == parent,
            None => server_scoped,
        },
        _ => true,
    }
}

/// Backoff decision for calls where only transient failures are worth retrying.
pub fn retry_transient(err: &ApiError) -> RetryDecision {
    match err.kind {
        ApiErrorKind::Throttled => match err.retry_after {
            Some(after) => RetryDecision::RetryAfter(after),
            None => RetryDecision::Retry,
        },
        ApiErrorKind::Transient => RetryDecision::Retry,
        _ => RetryDecision::Fail,
    }
}

/// Like [`retry_transient`], also retrying not-found (replication lag).
pub fn retry_transient_or_missing(err: &ApiError) -> RetryDecision {
    match err.kind {
        ApiErrorKind::NotFound => RetryDecision::Retry,
        _ => retry_transient(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn package_kind() -> ResourceKind {
        ResourceKind::new("package", "accessPackages").with_parent("catalog.id", Some("catalog/id"))
    }

    #[test]
    fn test_query_scopes_by_parent() {
        let query = Resolver::query_for(&package_kind(), &NaturalKey::scoped("Pkg", "c1"));
        assert_eq!(
            query.to_params(),
            vec![(
                "$filter".to_string(),
                "displayName eq 'Pkg' and catalog/id eq 'c1'".to_string()
            )]
        );
    }

    #[test]
    fn test_select_always_carries_lookup_fields() {
        let mut kind = package_kind();
        kind.select = vec!["description".into()];
        let query = Resolver::query_for(&kind, &NaturalKey::scoped("Pkg", "c1"));
        assert_eq!(query.select, vec!["description", "id", "displayName", "catalog"]);
    }

    #[test]
    fn test_exact_match_is_case_sensitive() {
        let kind = ResourceKind::new("catalog", "catalogs");
        let key = NaturalKey::new("Eng");
        assert!(is_exact_match(&kind, &key, &json!({"id": "1", "displayName": "Eng"}), false));
        assert!(!is_exact_match(&kind, &key, &json!({"id": "1", "displayName": "eng"}), false));
    }

    #[test]
    fn test_parent_reference_must_match() {
        let kind = package_kind();
        let key = NaturalKey::scoped("Pkg", "c1");
        let row = json!({"id": "p", "displayName": "Pkg", "catalog": {"id": "c2"}});
        assert!(!is_exact_match(&kind, &key, &row, true));

        let row = json!({"id": "p", "displayName": "Pkg"});
        assert!(is_exact_match(&kind, &key, &row, true));
        assert!(!is_exact_match(&kind, &key, &row, false));
    }

    #[test]
    fn test_retry_decisions() {
        assert_eq!(retry_transient(&ApiError::transient("x")), RetryDecision::Retry);
        assert_eq!(retry_transient(&ApiError::not_found("x")), RetryDecision::Fail);
        assert_eq!(
            retry_transient(&ApiError::throttled("x").with_retry_after(std::time::Duration::from_secs(2))),
            RetryDecision::RetryAfter(std::time::Duration::from_secs(2))
        );
        assert_eq!(
            retry_transient_or_missing(&ApiError::not_found("x")),
            RetryDecision::Retry
        );
        assert_eq!(
            retry_transient_or_missing(&ApiError::conflict("x")),
            RetryDecision::Fail
        );
    }
}
