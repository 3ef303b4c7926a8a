//! Repository and commit store seams.
//!
//! The object store (commits, trees, blobs) and the repository table are
//! owned by the repo manager; the clone manager reads records, walks commit
//! ancestry for the fast-forward check, and writes back the handful of
//! fields a finished clone establishes (head, worktree binding, token,
//! email, relay info, password).

use anyhow::Result;
use async_trait::async_trait;

/// A repository as known to the local store. `head` stays `None` until the
/// first checkout or merge completes, which is what makes restart
/// classification possible.
#[derive(Debug, Clone)]
pub struct RepoRecord {
    pub id: String,
    pub name: String,
    pub head: Option<String>,
    pub worktree: Option<String>,
    pub encrypted: bool,
    pub enc_version: i32,
    pub enc_key: Vec<u8>,
    pub enc_iv: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub id: String,
    pub root_id: String,
    pub creator_name: String,
    pub parent_ids: Vec<String>,
}

/// Symmetric key material handed to the merge engines when a repository is
/// encrypted.
#[derive(Debug, Clone)]
pub struct CryptoContext {
    pub version: i32,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl CryptoContext {
    pub fn for_repo(repo: &RepoRecord) -> Option<Self> {
        repo.encrypted.then(|| Self {
            version: repo.enc_version,
            key: repo.enc_key.clone(),
            iv: repo.enc_iv.clone(),
        })
    }
}

#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn lookup(&self, repo_id: &str) -> Option<RepoRecord>;

    /// All known repositories. Used for worktree conflict detection.
    async fn list(&self) -> Vec<RepoRecord>;

    /// Head commit of a named branch, or `None` if the branch is missing.
    async fn get_branch_head(&self, repo_id: &str, branch: &str) -> Option<Commit>;

    async fn get_commit(&self, commit_id: &str) -> Option<Commit>;

    async fn set_head(&self, repo_id: &str, commit_id: &str) -> Result<()>;

    async fn set_worktree(&self, repo_id: &str, worktree: &str) -> Result<()>;

    async fn set_token(&self, repo_id: &str, token: &str) -> Result<()>;

    async fn set_email(&self, repo_id: &str, email: &str) -> Result<()>;

    async fn set_relay_info(&self, repo_id: &str, addr: &str, port: &str) -> Result<()>;

    /// Check a password against the repository's stored encryption
    /// metadata. `Ok(false)` means the password is wrong; `Err` means the
    /// metadata could not be consulted.
    async fn verify_passwd(&self, repo_id: &str, passwd: &str) -> Result<bool>;

    /// Install the password into the repository record so the materialization
    /// engines can decrypt objects.
    async fn set_passwd(&self, repo_id: &str, passwd: &str) -> Result<()>;
}
