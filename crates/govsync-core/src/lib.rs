//! Core types for govsync.
//!
//! Everything here is pure data and pure functions: the structural differ,
//! placeholder rendering, resource kind descriptions and the desired/remote/
//! outcome types the engine passes around. Nothing in this crate performs I/O.

pub mod diff;
pub mod kind;
pub mod placeholder;
pub mod resource;

pub use diff::{changed_fields, equal, matches_desired, project};
pub use kind::{
    AsyncRequest, DEFAULT_IGNORED_FIELDS, KindError, Materialization, ParentScope, ResourceKind,
    lookup_path,
};
pub use placeholder::{PlaceholderError, Placeholders};
pub use resource::{
    Action, DesiredResource, NaturalKey, PolicyAttachment, PolicyPatchReport, ReconcileOutcome,
    RemoteResource, RemovalOutcome, RuleFailure,
};
