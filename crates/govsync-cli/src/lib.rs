//! The `govsync` command line tool.
//!
//! Reads a TOML manifest of resource kinds and desired resources, orders the
//! resources by their `${handle.field}` references and converges them wave by
//! wave through [`govsync_engine::Engine`].

pub mod apply;
pub mod cli;
pub mod config;
pub mod manifest;
pub mod observability;
pub mod output;
