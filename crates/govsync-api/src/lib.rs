//! # govsync-api
//!
//! Abstraction over the remote governance control plane.
//!
//! The engine talks to the backend exclusively through the [`RemoteApi`]
//! trait. Every failure is surfaced as an [`ApiError`] with a structured
//! [`ApiErrorKind`]; [`ErrorClassifier`] refines that kind for
//! backend-specific signals such as replication lag.
//!
//! [`HttpRemoteApi`] is the production implementation. An in-memory
//! implementation for tests and dry runs lives in `govsync-memory`.
//!
//! ## Example
//!
//! ```ignore
//! use govsync_api::{Filter, ListQuery, RemoteApi};
//!
//! async fn find_catalog(api: &dyn RemoteApi, name: &str) -> Result<Vec<Value>, ApiError> {
//!     api.list("catalogs", &ListQuery::filtered(Filter::eq("displayName", name)))
//!         .await
//! }
//! ```

mod classify;
mod error;
pub mod http;
mod query;
mod traits;

pub use classify::ErrorClassifier;
pub use error::{ApiError, ApiErrorKind};
pub use http::{HttpApiConfig, HttpRemoteApi};
pub use query::{Clause, Filter, ListQuery, escape_literal};
pub use traits::RemoteApi;

/// Type alias for a remote API result.
pub type ApiResult<T> = Result<T, ApiError>;

/// Type alias for a shared remote API trait object.
pub type DynRemoteApi = std::sync::Arc<dyn RemoteApi>;
