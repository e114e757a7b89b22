//! Waiting for request-based creates to materialize.

use std::time::Duration;

use govsync_api::{ApiErrorKind, DynRemoteApi, ErrorClassifier};
use govsync_core::{AsyncRequest, NaturalKey, RemoteResource, ResourceKind, lookup_path};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backoff::sleep_or_cancel;
use crate::error::ReconcileError;
use crate::resolver::{Lookup, Resolver};

pub struct Poller<'a> {
    api: &'a DynRemoteApi,
    resolver: &'a Resolver,
    classifier: &'a ErrorClassifier,
    interval: Duration,
    budget: Duration,
}

impl<'a> Poller<'a> {
    pub fn new(
        api: &'a DynRemoteApi,
        resolver: &'a Resolver,
        classifier: &'a ErrorClassifier,
        interval: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            api,
            resolver,
            classifier,
            interval,
            budget,
        }
    }

    /// Polls until the object behind `request_id` can be looked up by its key.
    ///
    /// Transient lookup failures count as "not yet". When the request
    /// declares a status field, the request itself is read on every poll and
    /// a failure state ends the wait with `ValidationFailed`. Running out of
    /// budget yields `MaterializationTimedOut`.
    pub async fn await_materialization(
        &self,
        kind: &ResourceKind,
        key: &NaturalKey,
        request: &AsyncRequest,
        request_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RemoteResource, ReconcileError> {
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ReconcileError::cancelled("materialize", key));
            }
            polls += 1;

            let found = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReconcileError::cancelled("materialize", key));
                }
                found = self.resolver.find_once(kind, key) => found,
            };
            match found {
                Ok(Lookup::Found(remote)) => {
                    debug!(key = %key, polls, "materialized");
                    return Ok(remote);
                }
                Ok(Lookup::Missing) => {}
                Ok(Lookup::Ambiguous(count)) => {
                    return Err(ReconcileError::AmbiguousMatch {
                        kind: kind.name.clone(),
                        key: key.to_string(),
                        count,
                    });
                }
                Err(err) if err.is_transient() => {
                    debug!(key = %key, polls, error = %err, "lookup failed, not yet");
                }
                Err(err) => return Err(ReconcileError::from_api("materialize", key, err)),
            }

            let state = match request_id {
                Some(request_id) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(ReconcileError::cancelled("materialize", key));
                    }
                    state = self.request_state(request, request_id) => state,
                },
                None => None,
            };
            if let (Some(request_id), Some(state)) = (request_id, state)
                && request
                    .failed_states
                    .iter()
                    .any(|failed| failed.eq_ignore_ascii_case(&state))
            {
                return Err(ReconcileError::validation(
                    "materialize",
                    key,
                    format!("request {request_id} ended in state '{state}'"),
                ));
            }

            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                return Err(ReconcileError::MaterializationTimedOut {
                    key: key.to_string(),
                    request_id: request_id.unwrap_or("(existing request)").to_string(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            let wait = self.interval.min(self.budget - elapsed);
            if !sleep_or_cancel(wait, cancel).await {
                return Err(ReconcileError::cancelled("materialize", key));
            }
        }
    }

    /// Current state of a submitted request, if the kind tracks one.
    ///
    /// Read failures are not fatal here; the object lookup decides.
    async fn request_state(&self, request: &AsyncRequest, request_id: &str) -> Option<String> {
        let field = request.status_field.as_deref()?;
        match self.api.read(&request.request_collection, request_id).await {
            Ok(Some(Value::Object(object))) => lookup_path(&object, field)
                .and_then(Value::as_str)
                .map(str::to_string),
            Ok(_) => None,
            Err(err) => {
                let kind = self.classifier.classify(&err);
                if kind != ApiErrorKind::NotFound {
                    debug!(request_id, error = %err, "request status unavailable");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use govsync_memory::{InMemoryRemoteApi, Operation};

    use super::*;
    use crate::backoff::RetryPolicy;

    #[tokio::test]
    async fn test_cancel_interrupts_a_slow_lookup() {
        let memory = Arc::new(InMemoryRemoteApi::new().with_list_latency(Duration::from_secs(30)));
        let api: DynRemoteApi = memory.clone();
        let classifier = ErrorClassifier::default();
        let retry = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
        let resolver = Resolver::new(api.clone(), classifier.clone(), retry);
        let poller = Poller::new(
            &api,
            &resolver,
            &classifier,
            Duration::from_millis(5),
            Duration::from_secs(60),
        );
        let kind = ResourceKind::new("assignment", "assignments");
        let request = AsyncRequest {
            request_collection: "assignmentRequests".into(),
            request_id_field: "id".into(),
            status_field: None,
            failed_states: Vec::new(),
        };

        let cancel = CancellationToken::new();
        let canceller = {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };
        let started = Instant::now();
        let err = poller
            .await_materialization(&kind, &NaturalKey::new("A"), &request, None, &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(memory.call_count(Operation::List, "assignments"), 1);
    }
}
