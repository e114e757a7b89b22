use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::kind::ResourceKind;

/// Caller-meaningful identity of a resource: a name, optionally within a parent scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl NaturalKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    pub fn scoped(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{parent}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A policy document shared between resources, patched rule by rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAttachment {
    /// Ledger key; attachments with the same key are patched once per session.
    pub target_key: String,
    /// Collection holding the policy document.
    pub collection: String,
    pub policy_id: String,
    /// Desired rules, possibly containing `${...}` placeholders.
    pub rules: Vec<Value>,
    /// Rules that must succeed for the patch to count as complete. Empty means all.
    #[serde(default)]
    pub critical_rules: Vec<String>,
    #[serde(default = "default_rule_id_field")]
    pub rule_id_field: String,
}

fn default_rule_id_field() -> String {
    "id".into()
}

impl PolicyAttachment {
    pub fn new(
        target_key: impl Into<String>,
        collection: impl Into<String>,
        policy_id: impl Into<String>,
        rules: Vec<Value>,
    ) -> Self {
        Self {
            target_key: target_key.into(),
            collection: collection.into(),
            policy_id: policy_id.into(),
            rules,
            critical_rules: Vec::new(),
            rule_id_field: default_rule_id_field(),
        }
    }

    pub fn with_critical_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_rules = rules.into_iter().map(Into::into).collect();
        self
    }

    /// Collection the individual rules live in.
    pub fn rules_collection(&self) -> String {
        format!("{}/{}/rules", self.collection, self.policy_id)
    }

    pub fn is_critical(&self, rule_id: &str) -> bool {
        self.critical_rules.is_empty() || self.critical_rules.iter().any(|r| r == rule_id)
    }
}

/// What the caller wants to exist remotely.
#[derive(Debug, Clone)]
pub struct DesiredResource {
    pub kind: Arc<ResourceKind>,
    pub key: NaturalKey,
    pub properties: Map<String, Value>,
    pub policy: Option<PolicyAttachment>,
}

impl DesiredResource {
    pub fn new(kind: Arc<ResourceKind>, key: NaturalKey) -> Self {
        Self {
            kind,
            key,
            properties: Map::new(),
            policy: None,
        }
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_property(mut self, field: impl Into<String>, value: Value) -> Self {
        self.properties.insert(field.into(), value);
        self
    }

    pub fn with_policy(mut self, policy: PolicyAttachment) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Properties the engine compares against the remote object.
    ///
    /// The key field always holds the natural key name.
    pub fn managed_properties(&self) -> Map<String, Value> {
        let mut managed = self.properties.clone();
        managed.insert(
            self.kind.key_field.clone(),
            Value::String(self.key.name.clone()),
        );
        managed
    }

    /// Body for a create call.
    pub fn create_body(&self) -> Value {
        Value::Object(self.managed_properties())
    }

    /// Body for an update call: the natural key and immutable fields are never sent.
    pub fn update_body(&self) -> Map<String, Value> {
        self.properties
            .iter()
            .filter(|(field, _)| **field != self.kind.key_field)
            .filter(|(field, _)| !self.kind.immutable_fields.contains(*field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

/// The backend's view of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub id: String,
    pub properties: Map<String, Value>,
}

impl RemoteResource {
    /// Wraps a remote JSON object; `None` if it is not an object with a string `id`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(properties) = value else {
            return None;
        };
        let id = properties.get("id")?.as_str()?.to_string();
        Some(Self { id, properties })
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.properties)
    }
}

/// What convergence did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A rule patch that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule_id: String,
    pub message: String,
}

/// Result of patching a shared policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyPatchReport {
    pub target_key: String,
    /// `true` when an earlier reconciliation in the same session already patched the target.
    pub already_applied: bool,
    pub patched: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<RuleFailure>,
}

impl PolicyPatchReport {
    pub fn new(target_key: impl Into<String>) -> Self {
        Self {
            target_key: target_key.into(),
            ..Self::default()
        }
    }

    pub fn already_applied(target_key: impl Into<String>) -> Self {
        Self {
            target_key: target_key.into(),
            already_applied: true,
            ..Self::default()
        }
    }

    /// One line per failed rule.
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|f| format!("{}: {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Result of converging one desired resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Backend identifier. Empty when an async create has not materialized yet.
    pub identifier: String,
    pub properties: Map<String, Value>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyPatchReport>,
}

impl ReconcileOutcome {
    pub fn new(remote: RemoteResource, action: Action) -> Self {
        Self {
            identifier: remote.id,
            properties: remote.properties,
            action,
            diagnostic: None,
            policy: None,
        }
    }

    /// Outcome of a submitted create whose object did not appear in time.
    pub fn pending(diagnostic: impl Into<String>) -> Self {
        Self {
            identifier: String::new(),
            properties: Map::new(),
            action: Action::Created,
            diagnostic: Some(diagnostic.into()),
            policy: None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        !self.identifier.is_empty()
    }
}

/// Result of removing a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOutcome {
    /// Identifier of the removed object, `None` when nothing matched.
    pub identifier: Option<String>,
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog_kind() -> Arc<ResourceKind> {
        Arc::new(ResourceKind::new("catalog", "catalogs").immutable(["catalogType"]))
    }

    #[test]
    fn test_natural_key_display() {
        assert_eq!(NaturalKey::new("Eng").to_string(), "Eng");
        assert_eq!(NaturalKey::scoped("Pkg", "c1").to_string(), "c1/Pkg");
    }

    #[test]
    fn test_create_body_carries_key_field() {
        let desired = DesiredResource::new(catalog_kind(), NaturalKey::new("Eng"))
            .with_property("description", json!("Engineering"));
        assert_eq!(
            desired.create_body(),
            json!({"displayName": "Eng", "description": "Engineering"})
        );
    }

    #[test]
    fn test_update_body_omits_key_and_immutable_fields() {
        let desired = DesiredResource::new(catalog_kind(), NaturalKey::new("Eng"))
            .with_property("displayName", json!("Eng"))
            .with_property("catalogType", json!("userManaged"))
            .with_property("description", json!("Engineering"));

        let body = desired.update_body();
        assert_eq!(Value::Object(body), json!({"description": "Engineering"}));
    }

    #[test]
    fn test_remote_resource_requires_string_id() {
        assert!(RemoteResource::from_value(json!({"id": "c1", "displayName": "Eng"})).is_some());
        assert!(RemoteResource::from_value(json!({"id": 7})).is_none());
        assert!(RemoteResource::from_value(json!(["c1"])).is_none());
    }

    #[test]
    fn test_pending_outcome_is_not_materialized() {
        let outcome = ReconcileOutcome::pending("still processing");
        assert!(!outcome.is_materialized());
        assert_eq!(outcome.action, Action::Created);
        assert_eq!(outcome.diagnostic.as_deref(), Some("still processing"));
    }

    #[test]
    fn test_policy_attachment_critical_rules() {
        let all = PolicyAttachment::new("k", "policies", "p1", vec![]);
        assert!(all.is_critical("anything"));
        assert_eq!(all.rules_collection(), "policies/p1/rules");

        let some = all.with_critical_rules(["Expiration_Admin_Eligibility"]);
        assert!(some.is_critical("Expiration_Admin_Eligibility"));
        assert!(!some.is_critical("Notification_Admin_Admin_Eligibility"));
    }
}
