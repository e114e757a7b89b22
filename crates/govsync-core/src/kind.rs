//! Resource kinds.
//!
//! The engine knows nothing about catalogs or packages. Each remote resource
//! kind is described by data: where its collection lives, which field is the
//! natural key, how it is scoped under a parent, which fields belong to the
//! backend, and whether creating it is immediate or goes through a request
//! that materializes later.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields every kind treats as backend-owned.
pub const DEFAULT_IGNORED_FIELDS: &[&str] = &["id", "@odata.context", "@odata.etag"];

/// Errors raised by kind validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KindError {
    #[error("kind '{kind}': field '{field}' must not be empty")]
    EmptyField { kind: String, field: &'static str },

    #[error("kind '{kind}': key field '{field}' cannot also be ignored")]
    IgnoredKeyField { kind: String, field: String },
}

/// How a parent scope is expressed on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentScope {
    /// Dotted path of the parent reference inside a remote object (`catalog.id`).
    pub remote_path: String,
    /// Field usable in a server-side filter (`catalog/id`). When absent the
    /// scope is enforced client side only.
    #[serde(default)]
    pub filter_field: Option<String>,
}

/// Request-based creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncRequest {
    /// Collection the create request is submitted to.
    pub request_collection: String,
    /// Field of the request envelope holding the request id.
    #[serde(default = "default_id_field")]
    pub request_id_field: String,
    /// Field of the request object holding its processing state.
    #[serde(default)]
    pub status_field: Option<String>,
    /// States after which the request will never materialize (compared case-insensitively).
    #[serde(default)]
    pub failed_states: Vec<String>,
}

fn default_id_field() -> String {
    "id".into()
}

/// Whether a create returns the object or a request for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Materialization {
    #[default]
    Immediate,
    Async(AsyncRequest),
}

/// Description of one remote resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKind {
    pub name: String,
    pub collection: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default)]
    pub parent: Option<ParentScope>,
    #[serde(default)]
    pub ignored_fields: Vec<String>,
    #[serde(default)]
    pub immutable_fields: Vec<String>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default = "default_true")]
    pub updatable: bool,
    #[serde(default)]
    pub materialization: Materialization,
}

fn default_key_field() -> String {
    "displayName".into()
}

fn default_true() -> bool {
    true
}

impl ResourceKind {
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            key_field: default_key_field(),
            parent: None,
            ignored_fields: Vec::new(),
            immutable_fields: Vec::new(),
            select: Vec::new(),
            updatable: true,
            materialization: Materialization::Immediate,
        }
    }

    pub fn with_key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    pub fn with_parent(
        mut self,
        remote_path: impl Into<String>,
        filter_field: Option<&str>,
    ) -> Self {
        self.parent = Some(ParentScope {
            remote_path: remote_path.into(),
            filter_field: filter_field.map(str::to_string),
        });
        self
    }

    pub fn ignoring<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn immutable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn not_updatable(mut self) -> Self {
        self.updatable = false;
        self
    }

    pub fn via_request(mut self, request: AsyncRequest) -> Self {
        self.materialization = Materialization::Async(request);
        self
    }

    pub fn validate(&self) -> Result<(), KindError> {
        let empty = |field: &'static str| KindError::EmptyField {
            kind: self.name.clone(),
            field,
        };
        if self.name.trim().is_empty() {
            return Err(empty("name"));
        }
        if self.collection.trim().is_empty() {
            return Err(empty("collection"));
        }
        if self.key_field.trim().is_empty() {
            return Err(empty("key_field"));
        }
        if let Some(parent) = &self.parent
            && parent.remote_path.trim().is_empty()
        {
            return Err(empty("parent.remote_path"));
        }
        if let Materialization::Async(request) = &self.materialization
            && request.request_collection.trim().is_empty()
        {
            return Err(empty("materialization.request_collection"));
        }
        if self.ignored_fields.contains(&self.key_field) {
            return Err(KindError::IgnoredKeyField {
                kind: self.name.clone(),
                field: self.key_field.clone(),
            });
        }
        Ok(())
    }

    /// Backend-owned fields: the defaults plus this kind's own list.
    pub fn ignored(&self) -> Vec<String> {
        DEFAULT_IGNORED_FIELDS
            .iter()
            .map(|f| f.to_string())
            .chain(self.ignored_fields.iter().cloned())
            .collect()
    }

    pub fn async_request(&self) -> Option<&AsyncRequest> {
        match &self.materialization {
            Materialization::Async(request) => Some(request),
            Materialization::Immediate => None,
        }
    }

    /// Value of the natural key inside a remote object.
    pub fn key_of<'a>(&self, object: &'a Map<String, Value>) -> Option<&'a str> {
        object.get(&self.key_field).and_then(Value::as_str)
    }

    /// Parent reference inside a remote object, if the kind is scoped.
    pub fn parent_of<'a>(&self, object: &'a Map<String, Value>) -> Option<&'a str> {
        let parent = self.parent.as_ref()?;
        lookup_path(object, &parent.remote_path).and_then(Value::as_str)
    }
}

/// Resolves a dotted path (`catalog.id`) inside an object.
pub fn lookup_path<'a>(object: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = object.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
