//! # Tether Daemon
//!
//! Keeps a filesystem directory tree and the instance tree inside Roblox
//! Studio continuously synchronized in both directions. Built on axum +
//! tokio: a WebSocket push channel (with an HTTP long-poll fallback) carries
//! typed messages, a debounced `notify` watcher picks up local edits, and a
//! persisted sourcemap mirrors the tree for external tooling.
//!
//! All mutation flows through one serialized event loop in [`daemon`]; the
//! tree model, file projection, and sourcemap document each have exactly one
//! owner, so no component locks another's state.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod oneshot;
pub mod projector;
pub mod scan;
pub mod server;
pub mod sourcemap;
pub mod tree;
pub mod watcher;

pub use config::Config;
pub use daemon::SyncDaemon;
pub use error::SyncError;
