//! The abstract remote resource API consumed by the engine.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;
use crate::query::ListQuery;

/// A REST-style control plane organised in collections.
///
/// Collections are paths relative to the API root (`catalogs`,
/// `policies/p1/rules`). Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Lists objects of a collection.
    ///
    /// An empty collection and a not-found collection both yield an empty list.
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<Value>, ApiError>;

    /// Reads one object; `None` when it does not exist.
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, ApiError>;

    /// Creates an object.
    ///
    /// Returns the created object, or the request envelope for collections
    /// whose objects materialize asynchronously.
    async fn create(&self, collection: &str, body: &Value) -> Result<Value, ApiError>;

    /// Updates an object.
    ///
    /// Returns the updated object when the backend sends one back, `None` on
    /// an empty (204) response.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<Option<Value>, ApiError>;

    /// Deletes an object. Deleting an object that does not exist succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError>;
}
