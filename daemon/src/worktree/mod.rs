//! Worktree materialization seams: indexing, checkout, and the two merge
//! engines.
//!
//! All of these operate on trees and the persisted index; none of them knows
//! about clone tasks. Indexing and merging are disk/CPU bound and are run by
//! the clone manager on blocking workers.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::repo::CryptoContext;

/// Root id of the empty tree, used as the common ancestor when merging a
/// fetched head into a pre-populated worktree.
pub const EMPTY_TREE_ID: &str = "0000000000000000000000000000000000000000";

pub trait Indexer: Send + Sync {
    /// Index the current contents of `worktree` and return the resulting
    /// root tree id. Blocking; callers run it on a worker thread.
    fn index_worktree(&self, repo_id: &str, worktree: &Path, passwd: Option<&str>)
        -> Result<String>;
}

#[async_trait]
pub trait CheckoutEngine: Send + Sync {
    /// Materialize the repository into an empty worktree. The engine sets
    /// the repository head itself once the tree is fully on disk.
    async fn checkout(&self, repo_id: &str, worktree: &Path) -> Result<()>;
}

/// Inputs of a recursive three-way merge. Conflicts are written into the
/// worktree; index and commits are left for the auto-commit cycle.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub repo_id: String,
    pub worktree: String,
    pub ancestor_root: String,
    pub local_root: String,
    pub remote_root: String,
    pub remote_head: String,
    /// Label for the local side in conflict markers (the caller's email).
    pub local_label: String,
    /// Label for the remote side (the remote head's creator).
    pub remote_label: String,
    pub crypt: Option<CryptoContext>,
}

/// Inputs of a two-way tree unpack used on the fast-forward path. The
/// engine loads the persisted index, unpacks {local, remote} and applies
/// updates into the worktree; the unpack result becomes the new index.
#[derive(Debug, Clone)]
pub struct UnpackRequest {
    pub repo_id: String,
    pub worktree: String,
    pub local_root: String,
    pub remote_root: String,
    pub remote_head: String,
    pub update: bool,
    pub merge: bool,
    pub crypt: Option<CryptoContext>,
}

pub trait MergeEngine: Send + Sync {
    fn merge_recursive(&self, req: &MergeRequest) -> Result<()>;

    fn unpack_twoway(&self, req: &UnpackRequest) -> Result<()>;
}
