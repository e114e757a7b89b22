//! Wave-by-wave convergence of a manifest.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use govsync_core::{Action, Placeholders, ReconcileOutcome, ResourceKind};
use govsync_engine::{Engine, ReconciliationSession};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::manifest::{Ensure, Manifest, ResourceSpec};

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Skip every later wave once a wave has a failing resource.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Updated,
    Unchanged,
    /// Submitted, but the object did not show up within the poll budget.
    Pending,
    Removed,
    /// Ensured absent and nothing was there.
    Absent,
    Failed,
    Skipped,
}

impl Status {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Pending => write!(f, "pending"),
            Self::Removed => write!(f, "removed"),
            Self::Absent => write!(f, "absent"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceReport {
    pub handle: String,
    pub kind: String,
    pub key: String,
    pub status: Status,
    pub identifier: Option<String>,
    pub detail: Option<String>,
}

impl ResourceReport {
    fn new(resource: &ResourceSpec, status: Status) -> Self {
        Self {
            handle: resource.handle.clone(),
            kind: resource.kind.clone(),
            key: resource.name.clone(),
            status,
            identifier: None,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// One entry per manifest resource, in manifest order.
    pub resources: Vec<ResourceReport>,
}

impl ApplyReport {
    pub fn failures(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.status.is_failure())
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    pub fn count(&self, status: Status) -> usize {
        self.resources.iter().filter(|r| r.status == status).count()
    }
}

/// Converges every resource of `manifest`.
///
/// Resources of one wave run concurrently. A failed resource only blocks the
/// resources that refer to it, unless `fail_fast` is set.
pub async fn apply(
    engine: &Engine,
    session: &ReconciliationSession,
    manifest: &Manifest,
    options: ApplyOptions,
) -> Result<ApplyReport> {
    let kinds = manifest.kinds_by_name();
    let waves = manifest.waves()?;
    let mut values = Placeholders::new();
    let mut failed: HashSet<String> = HashSet::new();
    let mut reports: Vec<Option<ResourceReport>> = vec![None; manifest.resources.len()];
    let mut aborted = false;

    for (number, wave) in waves.iter().enumerate() {
        let mut runnable = Vec::new();
        for &i in wave {
            let resource = &manifest.resources[i];
            let blocked = resource.dependencies().into_iter().find(|d| failed.contains(d));
            let reason = if aborted {
                Some("an earlier wave failed".to_string())
            } else if session.is_cancelled() {
                Some("cancelled".to_string())
            } else {
                blocked.map(|d| format!("depends on failed '{d}'"))
            };
            match reason {
                Some(reason) => {
                    failed.insert(resource.handle.clone());
                    reports[i] = Some(ResourceReport::new(resource, Status::Skipped).with_detail(reason));
                }
                None => runnable.push(i),
            }
        }
        if runnable.is_empty() {
            continue;
        }

        info!(wave = number + 1, resources = runnable.len(), "applying wave");
        let results = join_all(runnable.iter().map(|&i| {
            let resource = &manifest.resources[i];
            let kind = kinds.get(&resource.kind).cloned();
            run_one(engine, session, resource, kind, &values)
        }))
        .await;

        let mut wave_failed = false;
        for (&i, (report, outcome)) in runnable.iter().zip(results) {
            let resource = &manifest.resources[i];
            if report.status.is_failure() {
                wave_failed = true;
                failed.insert(resource.handle.clone());
            }
            if let Some(outcome) = outcome {
                publish(&mut values, resource, &outcome);
            }
            reports[i] = Some(report);
        }
        if wave_failed && options.fail_fast {
            warn!(wave = number + 1, "wave failed, skipping the remaining waves");
            aborted = true;
        }
    }

    Ok(ApplyReport {
        resources: reports.into_iter().flatten().collect(),
    })
}

async fn run_one(
    engine: &Engine,
    session: &ReconciliationSession,
    resource: &ResourceSpec,
    kind: Option<Arc<ResourceKind>>,
    values: &Placeholders,
) -> (ResourceReport, Option<ReconcileOutcome>) {
    let Some(kind) = kind else {
        let report = ResourceReport::new(resource, Status::Failed)
            .with_detail(format!("unknown kind '{}'", resource.kind));
        return (report, None);
    };

    match resource.ensure {
        Ensure::Present => {
            let desired = match resource.to_desired(kind, values) {
                Ok(desired) => desired,
                Err(e) => {
                    error!(handle = %resource.handle, error = %format!("{e:#}"), "cannot render resource");
                    let report = ResourceReport::new(resource, Status::Failed).with_detail(format!("{e:#}"));
                    return (report, None);
                }
            };
            let mut report = ResourceReport::new(resource, Status::Failed);
            report.key = desired.key.to_string();
            match engine.converge(session, &desired).await {
                Ok(outcome) => {
                    report.status = match outcome.action {
                        _ if !outcome.is_materialized() => Status::Pending,
                        Action::Created => Status::Created,
                        Action::Updated => Status::Updated,
                        Action::Unchanged => Status::Unchanged,
                    };
                    report.identifier = outcome.is_materialized().then(|| outcome.identifier.clone());
                    report.detail = outcome.diagnostic.clone().or_else(|| {
                        outcome.policy.as_ref().map(|p| {
                            if p.already_applied {
                                return format!("policy {} already applied", p.target_key);
                            }
                            let mut detail = format!(
                                "policy {}: {} patched, {} unchanged, {} failed",
                                p.target_key,
                                p.patched.len(),
                                p.unchanged.len(),
                                p.failed.len()
                            );
                            if !p.failed.is_empty() {
                                detail.push_str(&format!(" ({})", p.failure_summary()));
                            }
                            detail
                        })
                    });
                    (report, Some(outcome))
                }
                Err(e) => {
                    error!(handle = %resource.handle, category = %e.category(), error = %e, "convergence failed");
                    (report.with_detail(e.to_string()), None)
                }
            }
        }
        Ensure::Absent => {
            let key = match resource.key(values) {
                Ok(key) => key,
                Err(e) => {
                    let report = ResourceReport::new(resource, Status::Failed).with_detail(format!("{e:#}"));
                    return (report, None);
                }
            };
            match engine.remove(session, &kind, &key).await {
                Ok(removal) => {
                    let status = if removal.removed {
                        Status::Removed
                    } else {
                        Status::Absent
                    };
                    let mut report = ResourceReport::new(resource, status);
                    report.key = key.to_string();
                    report.identifier = removal.identifier;
                    (report, None)
                }
                Err(e) => {
                    error!(handle = %resource.handle, category = %e.category(), error = %e, "removal failed");
                    let report = ResourceReport::new(resource, Status::Failed).with_detail(e.to_string());
                    (report, None)
                }
            }
        }
    }
}

/// Makes `${handle.id}`, `${handle.name}` and every scalar property available to later waves.
fn publish(values: &mut Placeholders, resource: &ResourceSpec, outcome: &ReconcileOutcome) {
    let handle = &resource.handle;
    for (field, value) in &outcome.properties {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        values.insert(format!("{handle}.{field}"), text);
    }
    if outcome.is_materialized() {
        values.insert(format!("{handle}.id"), outcome.identifier.clone());
    }
    values.insert(format!("{handle}.name"), resource.name.clone());
}
