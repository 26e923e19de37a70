//! gascp — a control plane for Google Apps Script projects.
//!
//! Keeps three sources of truth coherent: the remote project (behind the
//! Apps Script REST API), a byte-faithful local mirror on disk, and a local
//! git repository acting as history, merge arbiter, and validation gate.
//! Sync decisions are hash-based throughout; mtimes are informational.

pub mod app;
pub mod config;
pub mod configlock;
pub mod conflict;
pub mod deploy;
pub mod error;
pub mod filemeta;
pub mod gitbridge;
pub mod hash;
pub mod hooks;
pub mod infra;
pub mod locks;
pub mod mcp;
pub mod mirror;
pub mod modwrap;
pub mod pathspec;
pub mod remote;
pub mod syncgate;
pub mod worktree;
pub mod writeflow;

pub use app::App;
pub use error::{Error, Result};
