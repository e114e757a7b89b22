//! In-memory remote API for govsync.
//!
//! [`InMemoryRemoteApi`] implements [`govsync_api::RemoteApi`] on top of
//! `dashmap` and imitates the behaviours of an eventually consistent control
//! plane that the engine has to cope with: objects that are not listable yet,
//! requests that materialize later, duplicate-create conflicts and injected
//! transient failures. It is the test double of the engine and the backend of
//! `govsync apply --dry-run`.
//!
//! # Example
//!
//! ```ignore
//! use govsync_memory::{InMemoryRemoteApi, Operation};
//! use govsync_api::{ApiError, RemoteApi};
//!
//! let api = InMemoryRemoteApi::new().with_visibility_lag(2);
//! api.fail_next(Operation::Create, "catalogs", ApiError::transient("busy"));
//! let created = api.create("catalogs", &serde_json::json!({"displayName": "Eng"})).await;
//! ```

mod api;
pub mod query;
mod recorder;

pub use api::{InMemoryRemoteApi, RequestRoute};
pub use recorder::{Call, Operation};

/// Creates a shareable in-memory remote API.
pub fn create_memory_api() -> govsync_api::DynRemoteApi {
    std::sync::Arc::new(InMemoryRemoteApi::new())
}
