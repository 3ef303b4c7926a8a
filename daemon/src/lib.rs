//! eddyd — the Eddy host daemon library.
//!
//! Eddy keeps peer-synced, versioned repositories mirrored onto the local
//! machine. This crate holds the clone orchestration core: the durable
//! clone task lifecycle ([`clone::CloneManager`]), the seams to the
//! subsystems it drives (repo store, transfer engine, peer layer, worktree
//! engines), SQLite persistence, and the web access token manager.

pub mod clone;
pub mod config;
pub mod events;
pub mod peer;
pub mod repo;
pub mod storage;
pub mod transfer;
pub mod webtoken;
pub mod worktree;

pub use clone::{CloneDeps, CloneError, CloneManager};
pub use config::DaemonConfig;
pub use events::EventBroadcaster;
pub use storage::Storage;
