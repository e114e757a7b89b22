//! Rule-by-rule patching of a shared policy document.

use std::collections::HashMap;

use govsync_api::{DynRemoteApi, ErrorClassifier, ListQuery};
use govsync_core::{
    DEFAULT_IGNORED_FIELDS, Placeholders, PolicyAttachment, PolicyPatchReport, RuleFailure,
    changed_fields,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{RetryError, RetryPolicy};
use crate::error::ReconcileError;
use crate::resolver::retry_transient;

pub struct PolicyPatcher<'a> {
    api: &'a DynRemoteApi,
    classifier: &'a ErrorClassifier,
    retry: RetryPolicy,
}

impl<'a> PolicyPatcher<'a> {
    pub fn new(api: &'a DynRemoteApi, classifier: &'a ErrorClassifier, retry: RetryPolicy) -> Self {
        Self {
            api,
            classifier,
            retry,
        }
    }

    /// Brings every desired rule of `attachment` in line with the remote policy.
    ///
    /// Only rules that differ are written, each with the whole desired rule as
    /// body. Fails with `PolicyPatchFailed` when a critical rule could not be
    /// patched; failures of other rules are only reported.
    pub async fn apply(
        &self,
        attachment: &PolicyAttachment,
        placeholders: &Placeholders,
        cancel: &CancellationToken,
    ) -> Result<PolicyPatchReport, ReconcileError> {
        let key = attachment.target_key.as_str();
        let desired = self.desired_rules(attachment, placeholders)?;
        let collection = attachment.rules_collection();
        let collection = collection.as_str();

        let current = self
            .retry
            .run("list rules", cancel, retry_transient, |_| async move {
                self.api
                    .list(collection, &ListQuery::new())
                    .await
                    .map_err(|e| self.classifier.refine(e))
            })
            .await
            .map_err(|e| ReconcileError::from_retry("list rules", key, e))?;
        let current: HashMap<String, Map<String, Value>> = current
            .into_iter()
            .filter_map(|rule| {
                let Value::Object(rule) = rule else {
                    return None;
                };
                let id = rule.get(&attachment.rule_id_field)?.as_str()?.to_string();
                Some((id, rule))
            })
            .collect();

        let ignored: Vec<String> = DEFAULT_IGNORED_FIELDS.iter().map(|f| f.to_string()).collect();
        let mut report = PolicyPatchReport::new(key);
        for (rule_id, rule) in desired {
            let drift = match current.get(&rule_id) {
                Some(remote) => changed_fields(remote, &rule, &ignored),
                None => vec!["<missing>".to_string()],
            };
            if drift.is_empty() {
                debug!(policy = key, rule = %rule_id, "rule unchanged");
                report.unchanged.push(rule_id);
                continue;
            }

            info!(policy = key, rule = %rule_id, fields = ?drift, "patching rule");
            let body = &Value::Object(rule);
            let id = rule_id.as_str();
            let patched = self
                .retry
                .run("patch rule", cancel, retry_transient, |_| async move {
                    self.api
                        .update(collection, id, body)
                        .await
                        .map_err(|e| self.classifier.refine(e))
                })
                .await;
            match patched {
                Ok(_) => report.patched.push(rule_id),
                Err(RetryError::Cancelled { .. }) => {
                    return Err(ReconcileError::cancelled("patch rule", key));
                }
                Err(err) => {
                    warn!(policy = key, rule = %rule_id, error = %err, "rule patch failed");
                    report.failed.push(RuleFailure {
                        rule_id,
                        message: err.to_string(),
                    });
                }
            }
        }

        let critical: Vec<&RuleFailure> = report
            .failed
            .iter()
            .filter(|f| attachment.is_critical(&f.rule_id))
            .collect();
        if !critical.is_empty() {
            let attempted = report
                .patched
                .iter()
                .filter(|id| attachment.is_critical(id))
                .count()
                + critical.len();
            return Err(ReconcileError::PolicyPatchFailed {
                key: key.to_string(),
                message: format!(
                    "{} of {} critical rule patches failed: {}",
                    critical.len(),
                    attempted,
                    report.failure_summary()
                ),
            });
        }
        Ok(report)
    }

    /// Desired rules with placeholders rendered, keyed by rule id in declaration order.
    fn desired_rules(
        &self,
        attachment: &PolicyAttachment,
        placeholders: &Placeholders,
    ) -> Result<Vec<(String, Map<String, Value>)>, ReconcileError> {
        let key = &attachment.target_key;
        attachment
            .rules
            .iter()
            .map(|rule| {
                let rendered = placeholders
                    .render(rule)
                    .map_err(|e| ReconcileError::invalid(key, e.to_string()))?;
                let Value::Object(rendered) = rendered else {
                    return Err(ReconcileError::invalid(key, "policy rules must be objects"));
                };
                let id = rendered
                    .get(&attachment.rule_id_field)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ReconcileError::invalid(
                            key,
                            format!("policy rule without '{}'", attachment.rule_id_field),
                        )
                    })?;
                Ok((id, rendered))
            })
            .collect()
    }
}

/// Renders the placeholders of an attachment's addressing fields.
pub fn render_attachment(
    attachment: &PolicyAttachment,
    placeholders: &Placeholders,
) -> Result<PolicyAttachment, ReconcileError> {
    let render = |input: &str| {
        placeholders
            .render_str(input)
            .map_err(|e| ReconcileError::invalid(&attachment.target_key, e.to_string()))
    };
    Ok(PolicyAttachment {
        target_key: render(&attachment.target_key)?,
        collection: render(&attachment.collection)?,
        policy_id: render(&attachment.policy_id)?,
        ..attachment.clone()
    })
}
