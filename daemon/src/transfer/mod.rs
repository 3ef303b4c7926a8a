//! Bulk object transfer seam.
//!
//! Downloads run entirely inside the transfer engine; the clone manager
//! holds an opaque handle and hears back exactly once per handle through the
//! completion queue (`Completion::Transfer`).

use anyhow::Result;
use async_trait::async_trait;

/// Ref name the engine resolves on the peer to find what to download.
pub const FETCH_HEAD_REF: &str = "fetch_head";
/// Branch a fresh clone tracks.
pub const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Canceled,
    Error,
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Enqueue a download and return its handle, or fail fast when the
    /// request is rejected outright (bad token, unknown peer).
    async fn start_download(
        &self,
        repo_id: &str,
        peer_id: &str,
        fetch_head_ref: &str,
        branch: &str,
        token: &str,
    ) -> Result<String>;

    /// Ask a running download to stop. The engine still emits a terminal
    /// completion event for the handle.
    async fn cancel(&self, handle: &str);

    /// Forget a finished download.
    async fn remove(&self, handle: &str);
}
