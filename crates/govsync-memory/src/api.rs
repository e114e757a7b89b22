use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use govsync_api::{ApiError, ListQuery, RemoteApi};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::query;
use crate::recorder::{Call, Operation, Recorder};

#[derive(Debug, Clone)]
struct StoredObject {
    id: String,
    value: Map<String, Value>,
    /// Remaining list calls during which the object is not visible yet.
    hidden_for: u32,
}

/// How a request collection turns submissions into objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRoute {
    /// Collection the object shows up in.
    pub target_collection: String,
    /// Field of the request object reporting its state.
    pub status_field: String,
    /// Number of target listings before the request is processed.
    pub materialize_after: u32,
    /// Terminal state to report instead of delivering the object.
    pub fail_with: Option<String>,
}

impl RequestRoute {
    pub fn new(target_collection: impl Into<String>) -> Self {
        Self {
            target_collection: target_collection.into(),
            status_field: "status".into(),
            materialize_after: 1,
            fail_with: None,
        }
    }

    pub fn after_polls(mut self, polls: u32) -> Self {
        self.materialize_after = polls;
        self
    }

    pub fn failing_with(mut self, state: impl Into<String>) -> Self {
        self.fail_with = Some(state.into());
        self
    }

    /// A route whose object never appears.
    pub fn never(mut self) -> Self {
        self.materialize_after = u32::MAX;
        self
    }
}

#[derive(Debug, Clone)]
struct PendingObject {
    request_collection: String,
    request_id: String,
    object: Map<String, Value>,
    polls_left: u32,
}

/// In-memory [`RemoteApi`] that behaves like an eventually consistent backend.
///
/// This implementation provides:
/// - case-insensitive server-side filtering
/// - replication lag: new objects stay invisible for a number of listings
/// - request collections whose objects materialize after a number of polls
/// - per-collection uniqueness with 409 conflicts, including on invisible objects
/// - fault injection and a call log for assertions
#[derive(Debug)]
pub struct InMemoryRemoteApi {
    collections: DashMap<String, Vec<StoredObject>>,
    unique: DashMap<String, Vec<String>>,
    routes: DashMap<String, RequestRoute>,
    pending: DashMap<String, Vec<PendingObject>>,
    visibility_lag: u32,
    list_latency: Option<Duration>,
    echo_updates: bool,
    recorder: Recorder,
}

impl Default for InMemoryRemoteApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteApi {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            unique: DashMap::new(),
            routes: DashMap::new(),
            pending: DashMap::new(),
            visibility_lag: 0,
            list_latency: None,
            echo_updates: false,
            recorder: Recorder::default(),
        }
    }

    /// Hides newly created objects from the next `lists` listings of their collection.
    pub fn with_visibility_lag(mut self, lists: u32) -> Self {
        self.visibility_lag = lists;
        self
    }

    /// Delays every `list` response by `latency`.
    pub fn with_list_latency(mut self, latency: Duration) -> Self {
        self.list_latency = Some(latency);
        self
    }

    /// Makes `update` return the updated object instead of an empty body.
    pub fn with_update_echo(mut self) -> Self {
        self.echo_updates = true;
        self
    }

    /// Rejects creates in `collection` that repeat the values of `fields`.
    pub fn with_unique_key(self, collection: &str, fields: &[&str]) -> Self {
        self.unique.insert(
            collection.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Turns `request_collection` into an asynchronous request endpoint.
    pub fn with_request_route(self, request_collection: &str, route: RequestRoute) -> Self {
        self.routes.insert(request_collection.to_string(), route);
        self
    }

    /// Stores an object directly, bypassing lag, faults and the call log.
    ///
    /// Uses the object's `id` when present. Returns the id.
    pub fn seed(&self, collection: &str, value: Value) -> String {
        let mut value = match value {
            Value::Object(map) => map,
            other => Map::from_iter([("value".to_string(), other)]),
        };
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(new_id);
        value.insert("id".into(), Value::String(id.clone()));
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredObject {
                id: id.clone(),
                value,
                hidden_for: 0,
            });
        id
    }

    /// Queues `error` for the next call of `operation` on `collection`.
    pub fn fail_next(&self, operation: Operation, collection: &str, error: ApiError) {
        self.recorder.inject(operation, collection, error, 1);
    }

    /// Queues `times` copies of `error`.
    pub fn fail_times(&self, operation: Operation, collection: &str, error: ApiError, times: usize) {
        self.recorder.inject(operation, collection, error, times);
    }

    /// Object as currently stored, visible or not.
    pub fn object(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections.get(collection).and_then(|objects| {
            objects
                .iter()
                .find(|o| o.id == id)
                .map(|o| Value::Object(o.value.clone()))
        })
    }

    /// Every stored object of a collection, visible or not.
    pub fn objects(&self, collection: &str) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|objects| {
                objects
                    .iter()
                    .map(|o| Value::Object(o.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.recorder.calls()
    }

    /// Number of `operation` calls against `collection`.
    pub fn call_count(&self, operation: Operation, collection: &str) -> usize {
        self.recorder.count(operation, collection)
    }

    /// Number of create, update and delete calls.
    pub fn write_count(&self) -> usize {
        self.recorder.writes()
    }

    /// Forgets recorded calls and pending faults. Stored objects are kept.
    pub fn reset_calls(&self) {
        self.recorder.clear();
    }

    fn enter(
        &self,
        operation: Operation,
        collection: &str,
        id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<(), ApiError> {
        self.recorder.record(Call {
            operation,
            collection: collection.to_string(),
            id: id.map(str::to_string),
            body: body.cloned(),
        });
        match self.recorder.take_fault(operation, collection) {
            Some(err) => {
                debug!(%operation, collection, error = %err, "injected failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn duplicate_of(&self, collection: &str, body: &Map<String, Value>) -> Option<String> {
        let fields = self.unique.get(collection)?.clone();
        let same = |candidate: &Map<String, Value>| {
            fields
                .iter()
                .all(|f| body.get(f).is_some() && candidate.get(f) == body.get(f))
        };
        let existing = self.collections.get(collection).and_then(|objects| {
            objects
                .iter()
                .find(|o| same(&o.value))
                .map(|o| o.id.clone())
        });
        existing.or_else(|| {
            self.pending.get(collection).and_then(|pending| {
                pending
                    .iter()
                    .find(|p| same(&p.object))
                    .map(|p| p.request_id.clone())
            })
        })
    }

    fn insert(&self, collection: &str, mut value: Map<String, Value>) -> Map<String, Value> {
        let id = new_id();
        value.insert("id".into(), Value::String(id.clone()));
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredObject {
                id,
                value: value.clone(),
                hidden_for: self.visibility_lag,
            });
        value
    }

    fn submit_request(
        &self,
        request_collection: &str,
        route: &RequestRoute,
        body: Map<String, Value>,
    ) -> Map<String, Value> {
        let request_id = format!("req-{}", new_id());
        let mut request = body.clone();
        request.insert("id".into(), Value::String(request_id.clone()));
        request.insert(route.status_field.clone(), Value::String("Submitted".into()));
        self.collections
            .entry(request_collection.to_string())
            .or_default()
            .push(StoredObject {
                id: request_id.clone(),
                value: request.clone(),
                hidden_for: 0,
            });
        self.pending
            .entry(route.target_collection.clone())
            .or_default()
            .push(PendingObject {
                request_collection: request_collection.to_string(),
                request_id,
                object: body,
                polls_left: route.materialize_after,
            });
        request
    }

    /// Advances pending requests targeting `collection` by one poll.
    fn advance_pending(&self, collection: &str) {
        let matured: Vec<PendingObject> = match self.pending.get_mut(collection) {
            Some(mut pending) => {
                for p in pending.iter_mut() {
                    p.polls_left = p.polls_left.saturating_sub(1);
                }
                let (done, waiting) = std::mem::take(&mut *pending)
                    .into_iter()
                    .partition(|p| p.polls_left == 0);
                *pending = waiting;
                done
            }
            None => return,
        };

        for p in matured {
            let Some(route) = self
                .routes
                .get(&p.request_collection)
                .map(|r| r.value().clone())
            else {
                continue;
            };
            let state = match &route.fail_with {
                Some(state) => state.clone(),
                None => {
                    let id = new_id();
                    let mut object = p.object;
                    object.insert("id".into(), Value::String(id.clone()));
                    self.collections
                        .entry(collection.to_string())
                        .or_default()
                        .push(StoredObject {
                            id,
                            value: object,
                            hidden_for: 0,
                        });
                    "Delivered".to_string()
                }
            };
            if let Some(mut requests) = self.collections.get_mut(&p.request_collection)
                && let Some(request) = requests.iter_mut().find(|r| r.id == p.request_id)
            {
                request
                    .value
                    .insert(route.status_field.clone(), Value::String(state));
            }
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl RemoteApi for InMemoryRemoteApi {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<Value>, ApiError> {
        self.enter(Operation::List, collection, None, None)?;
        if let Some(latency) = self.list_latency {
            tokio::time::sleep(latency).await;
        }
        self.advance_pending(collection);

        let Some(mut objects) = self.collections.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for object in objects.iter_mut() {
            if object.hidden_for > 0 {
                object.hidden_for -= 1;
                continue;
            }
            let visible = query
                .filter
                .as_ref()
                .is_none_or(|f| query::matches(f, &object.value));
            if visible {
                rows.push(Value::Object(query::select(&object.value, &query.select)));
            }
        }
        Ok(rows)
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, ApiError> {
        self.enter(Operation::Read, collection, Some(id), None)?;
        Ok(self.collections.get(collection).and_then(|objects| {
            objects
                .iter()
                .find(|o| o.id == id && o.hidden_for == 0)
                .map(|o| Value::Object(o.value.clone()))
        }))
    }

    async fn create(&self, collection: &str, body: &Value) -> Result<Value, ApiError> {
        self.enter(Operation::Create, collection, None, Some(body))?;
        let Value::Object(object) = body else {
            return Err(ApiError::validation("request body must be a JSON object"));
        };

        if let Some(route) = self.routes.get(collection).map(|r| r.value().clone()) {
            if let Some(existing) = self.duplicate_of(&route.target_collection, object) {
                return Err(ApiError::from_response(
                    409,
                    Some("PendingRequestExists".into()),
                    format!("a request for this object is already pending or fulfilled ({existing})"),
                ));
            }
            return Ok(Value::Object(self.submit_request(collection, &route, object.clone())));
        }

        if let Some(existing) = self.duplicate_of(collection, object) {
            return Err(ApiError::from_response(
                409,
                Some("ResourceAlreadyExists".into()),
                format!("object already exists ({existing})"),
            ));
        }
        Ok(Value::Object(self.insert(collection, object.clone())))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<Option<Value>, ApiError> {
        self.enter(Operation::Update, collection, Some(id), Some(body))?;
        let Value::Object(patch) = body else {
            return Err(ApiError::validation("request body must be a JSON object"));
        };
        let mut objects = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| ApiError::not_found(format!("{collection}/{id} does not exist")))?;
        let object = objects
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| ApiError::not_found(format!("{collection}/{id} does not exist")))?;
        for (field, value) in patch {
            if field != "id" {
                object.value.insert(field.clone(), value.clone());
            }
        }
        Ok(self.echo_updates.then(|| Value::Object(object.value.clone())))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError> {
        self.enter(Operation::Delete, collection, Some(id), None)?;
        if let Some(mut objects) = self.collections.get_mut(collection) {
            objects.retain(|o| o.id != id);
        }
        Ok(())
    }
}
