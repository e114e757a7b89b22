//! Convergence of single resources.
//!
//! `Start -> Lookup -> {missing -> Create -> Materialize, equal -> Unchanged,
//! different -> Update}`, followed by the policy sub-flow for composite
//! resources.

use govsync_api::{DynRemoteApi, ErrorClassifier};
use govsync_core::{
    Action, AsyncRequest, DesiredResource, NaturalKey, Placeholders, PolicyPatchReport,
    ReconcileOutcome, RemoteResource, RemovalOutcome, ResourceKind, changed_fields, placeholder,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::{RetryError, RetryPolicy};
use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::poller::Poller;
use crate::policy::{PolicyPatcher, render_attachment};
use crate::resolver::{Resolver, retry_transient, retry_transient_or_missing};
use crate::session::{Access, ReconciliationSession};

pub struct Engine {
    api: DynRemoteApi,
    config: EngineConfig,
    retry: RetryPolicy,
    resolver: Resolver,
}

impl Engine {
    pub fn new(api: DynRemoteApi, config: EngineConfig) -> Self {
        let retry = RetryPolicy::from_settings(&config.retry);
        let resolver = Resolver::new(api.clone(), config.classifier.clone(), retry);
        Self {
            api,
            config,
            retry,
            resolver,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// A fresh session using the configured settle delay.
    pub fn session(&self) -> ReconciliationSession {
        ReconciliationSession::new(self.config.settle_delay())
    }

    fn classifier(&self) -> &ErrorClassifier {
        &self.config.classifier
    }

    /// Converges one desired resource.
    #[instrument(
        name = "converge",
        skip_all,
        fields(kind = %desired.kind.name, key = %desired.key, session = %session.id())
    )]
    pub async fn converge(
        &self,
        session: &ReconciliationSession,
        desired: &DesiredResource,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        validate_desired(desired)?;
        let cancel = session.cancellation();
        let kind = desired.kind.as_ref();

        let mut outcome = match self.resolver.find(kind, &desired.key, cancel).await? {
            Some(remote) => self.converge_existing(desired, remote, cancel).await?,
            None => match kind.async_request() {
                Some(request) => self.create_via_request(desired, request, cancel).await?,
                None => self.create(desired, cancel).await?,
            },
        };

        if let Some(attachment) = &desired.policy {
            if outcome.is_materialized() {
                outcome.policy = Some(self.attach_policy(session, desired, &outcome).await?);
            } else {
                let note = format!(
                    "policy {} not applied, object not materialized",
                    attachment.target_key
                );
                warn!(policy = %attachment.target_key, "{note}");
                outcome.diagnostic = Some(match outcome.diagnostic.take() {
                    Some(diagnostic) => format!("{diagnostic}; {note}"),
                    None => note,
                });
            }
        }

        info!(action = %outcome.action, id = %outcome.identifier, "converged");
        Ok(outcome)
    }

    /// Deletes the object behind `key`, if there is one.
    #[instrument(name = "remove", skip_all, fields(kind = %kind.name, key = %key, session = %session.id()))]
    pub async fn remove(
        &self,
        session: &ReconciliationSession,
        kind: &ResourceKind,
        key: &NaturalKey,
    ) -> Result<RemovalOutcome, ReconcileError> {
        kind.validate()
            .map_err(|e| ReconcileError::invalid(key, e.to_string()))?;
        let cancel = session.cancellation();

        let Some(remote) = self.resolver.find(kind, key, cancel).await? else {
            debug!("nothing to remove");
            return Ok(RemovalOutcome {
                identifier: None,
                removed: false,
            });
        };

        let id = remote.id.as_str();
        let deleted = self
            .retry
            .run("delete", cancel, retry_transient, |_| async move {
                self.api
                    .delete(&kind.collection, id)
                    .await
                    .map_err(|e| self.classifier().refine(e))
            })
            .await;
        match deleted {
            Ok(()) => {}
            Err(RetryError::Failed { error, .. }) if error.is_not_found() => {
                debug!(id, "already gone");
            }
            Err(err) => return Err(ReconcileError::from_retry("delete", key, err)),
        }

        info!(id, "removed");
        Ok(RemovalOutcome {
            identifier: Some(remote.id),
            removed: true,
        })
    }

    async fn create(
        &self,
        desired: &DesiredResource,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let kind = desired.kind.as_ref();
        let body = &desired.create_body();
        info!(collection = %kind.collection, "creating");

        // A missing dependency right after its own creation is replication lag.
        let created = self
            .retry
            .run("create", cancel, retry_transient_or_missing, |_| async move {
                self.api
                    .create(&kind.collection, body)
                    .await
                    .map_err(|e| self.classifier().refine(e))
            })
            .await;

        match created {
            Ok(value) => {
                let remote = match RemoteResource::from_value(value) {
                    Some(remote) => remote,
                    None => {
                        self.resolver
                            .find_eventually(kind, &desired.key, cancel)
                            .await?
                    }
                };
                Ok(ReconcileOutcome::new(remote, Action::Created))
            }
            Err(RetryError::Failed { error, .. }) if error.is_conflict() => {
                info!(error = %error, "already exists, resolving existing object");
                let remote = self
                    .resolver
                    .find_eventually(kind, &desired.key, cancel)
                    .await?;
                self.converge_existing(desired, remote, cancel).await
            }
            Err(err) => Err(ReconcileError::from_retry("create", &desired.key, err)),
        }
    }

    async fn create_via_request(
        &self,
        desired: &DesiredResource,
        request: &AsyncRequest,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let kind = desired.kind.as_ref();
        let body = &desired.create_body();
        info!(collection = %request.request_collection, "submitting request");

        let submitted = self
            .retry
            .run("submit", cancel, retry_transient_or_missing, |_| async move {
                self.api
                    .create(&request.request_collection, body)
                    .await
                    .map_err(|e| self.classifier().refine(e))
            })
            .await;
        let (request_id, conflicted) = match submitted {
            Ok(envelope) => (
                envelope
                    .get(&request.request_id_field)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                false,
            ),
            Err(RetryError::Failed { error, .. }) if error.is_conflict() => {
                info!(error = %error, "request already pending or fulfilled");
                (None, true)
            }
            Err(err) => return Err(ReconcileError::from_retry("submit", &desired.key, err)),
        };

        let poller = Poller::new(
            &self.api,
            &self.resolver,
            self.classifier(),
            self.config.poll_interval(),
            self.config.poll_timeout(),
        );
        let materialized = poller
            .await_materialization(kind, &desired.key, request, request_id.as_deref(), cancel)
            .await;

        match materialized {
            Ok(remote) if conflicted => self.converge_existing(desired, remote, cancel).await,
            Ok(remote) => Ok(ReconcileOutcome::new(remote, Action::Created)),
            Err(err @ ReconcileError::MaterializationTimedOut { .. })
                if !self.config.poller.fail_on_timeout =>
            {
                warn!(error = %err, "request submitted but object not materialized yet");
                Ok(ReconcileOutcome::pending(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn converge_existing(
        &self,
        desired: &DesiredResource,
        remote: RemoteResource,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let kind = desired.kind.as_ref();
        let managed = desired.managed_properties();
        let changed = changed_fields(&remote.properties, &managed, &kind.ignored());
        if changed.is_empty() {
            debug!(id = %remote.id, "no drift");
            return Ok(ReconcileOutcome::new(remote, Action::Unchanged));
        }

        if !kind.updatable {
            return Err(ReconcileError::validation(
                "update",
                &desired.key,
                format!(
                    "{} '{}' cannot be updated in place; drifted fields: {}",
                    kind.name,
                    desired.key,
                    changed.join(", ")
                ),
            ));
        }
        let immutable: Vec<&str> = changed
            .iter()
            .filter(|f| kind.immutable_fields.contains(*f))
            .map(String::as_str)
            .collect();
        if !immutable.is_empty() {
            return Err(ReconcileError::validation(
                "update",
                &desired.key,
                format!("immutable fields drifted: {}", immutable.join(", ")),
            ));
        }

        let body = desired.update_body();
        info!(id = %remote.id, fields = ?changed, "updating");
        let id = remote.id.as_str();
        let payload = &Value::Object(body.clone());
        let response = self
            .retry
            .run("update", cancel, retry_transient, |_| async move {
                self.api
                    .update(&kind.collection, id, payload)
                    .await
                    .map_err(|e| self.classifier().refine(e))
            })
            .await
            .map_err(|e| ReconcileError::from_retry("update", &desired.key, e))?;

        let properties = match response {
            Some(Value::Object(updated)) if !updated.is_empty() => with_id(updated, id),
            _ => overlay(remote.properties.clone(), body),
        };
        Ok(ReconcileOutcome::new(
            RemoteResource {
                id: remote.id,
                properties,
            },
            Action::Updated,
        ))
    }

    async fn attach_policy(
        &self,
        session: &ReconciliationSession,
        desired: &DesiredResource,
        outcome: &ReconcileOutcome,
    ) -> Result<PolicyPatchReport, ReconcileError> {
        let Some(attachment) = &desired.policy else {
            return Ok(PolicyPatchReport::default());
        };
        let placeholders = Placeholders::new()
            .with("id", &outcome.identifier)
            .with("name", &desired.key.name);
        let attachment = render_attachment(attachment, &placeholders)?;

        let patcher = PolicyPatcher::new(&self.api, self.classifier(), self.retry);
        let access = session
            .with_exclusive_access(&attachment.target_key, || {
                patcher.apply(&attachment, &placeholders, session.cancellation())
            })
            .await?;
        Ok(match access {
            Access::Applied(report) => report,
            Access::AlreadyApplied => PolicyPatchReport::already_applied(&attachment.target_key),
        })
    }
}

fn validate_desired(desired: &DesiredResource) -> Result<(), ReconcileError> {
    desired
        .kind
        .validate()
        .map_err(|e| ReconcileError::invalid(&desired.key, e.to_string()))?;
    if desired.key.name.trim().is_empty() {
        return Err(ReconcileError::invalid(&desired.key, "natural key is empty"));
    }
    if desired.kind.parent.is_some() && desired.key.parent.is_none() {
        return Err(ReconcileError::invalid(
            &desired.key,
            format!("{} is scoped and needs a parent", desired.kind.name),
        ));
    }
    let unresolved = placeholder::references(&Value::Object(desired.properties.clone()));
    if !unresolved.is_empty() {
        let names: Vec<_> = unresolved.into_iter().collect();
        return Err(ReconcileError::invalid(
            &desired.key,
            format!("unresolved placeholders: {}", names.join(", ")),
        ));
    }
    Ok(())
}

fn with_id(mut properties: Map<String, Value>, id: &str) -> Map<String, Value> {
    properties
        .entry("id")
        .or_insert_with(|| Value::String(id.to_string()));
    properties
}

/// Remote properties with the update body written over them.
fn overlay(mut remote: Map<String, Value>, body: Map<String, Value>) -> Map<String, Value> {
    remote.extend(body);
    remote
}
