//! cursor-sync keeps a Cursor IDE configuration tree continuously
//! synchronized with a private remote Git repository across machines.
//!
//! The daemon watches the user-scope subtree, debounces changes, mirrors
//! content into a local working copy of the remote, and commits and pushes
//! on change. Remote changes are pulled periodically and materialized back.
//! Nothing touches the network until the privacy gate has verified the
//! remote repository is private.

pub mod auth;
pub mod config;
pub mod daemon;
pub mod detect;
pub mod github;
pub mod hash;
pub mod logging;
pub mod marker;
pub mod mirror;
pub mod paths;
pub mod privacy;
pub mod sync;
pub mod transport;
pub mod watcher;

pub use config::{Config, ConflictStrategy};
pub use daemon::Daemon;
pub use sync::{SyncError, Syncer};
