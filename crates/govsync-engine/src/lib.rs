//! # govsync-engine
//!
//! Reconciliation engine for eventually consistent governance APIs.
//!
//! [`Engine::converge`] takes one [`DesiredResource`](govsync_core::DesiredResource)
//! and drives the remote API until the remote object matches it: lookup by
//! natural key, then create, update or nothing. Around that core sit the
//! pieces the backend's eventual consistency requires:
//!
//! - [`backoff`]: bounded, capped exponential retry, cancellable at every sleep
//! - [`resolver`]: natural key lookup with client-side exact matching
//! - [`poller`]: waiting for request-based creates to materialize
//! - [`session`]: per-key serialization and the patch ledger of one run
//! - [`policy`]: rule-by-rule patching of shared policy documents
//!
//! ## Example
//!
//! ```ignore
//! use govsync_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::new(api, EngineConfig::default());
//! let session = engine.session();
//! let outcome = engine.converge(&session, &desired).await?;
//! println!("{} {}", outcome.action, outcome.identifier);
//! ```

pub mod backoff;
pub mod config;
mod engine;
mod error;
pub mod poller;
pub mod policy;
pub mod resolver;
pub mod session;

pub use backoff::{RetryDecision, RetryError, RetryPolicy, RetryState};
pub use config::{EngineConfig, PollerSettings, RetrySettings};
pub use engine::Engine;
pub use error::{ErrorCategory, ReconcileError};
pub use resolver::{Lookup, Resolver};
pub use session::{Access, Mutation, ReconciliationSession};

/// Type alias for a reconciliation result.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
