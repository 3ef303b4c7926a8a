//! The merge side of materialization.
//!
//! Decides between the fast-forward path (the local worktree's indexed tree
//! already appears in the remote head's ancestry) and a full three-way
//! merge against the empty tree, then runs the chosen engine on a worker.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, warn};

use crate::repo::{Commit, CryptoContext, RepoRecord};
use crate::worktree::{MergeRequest, UnpackRequest, EMPTY_TREE_ID};

use super::task::short_id;
use super::{CloneDeps, CloneManager, CloneTask, Completion, Passwd};

/// Branch a fetched repository's head lands on.
const LOCAL_BRANCH: &str = "local";

struct MergeJob {
    repo_id: String,
    worktree: String,
    passwd: Option<Passwd>,
    /// Indexed root of the pre-existing worktree, when admission indexed it.
    root_id: Option<String>,
    email: String,
    crypt: Option<CryptoContext>,
}

impl CloneManager {
    pub(super) fn spawn_merge_job(&self, task: &CloneTask, repo: &RepoRecord) {
        let deps = self.deps.clone();
        let tx = self.completions_tx.clone();
        let job = MergeJob {
            repo_id: task.repo_id.clone(),
            worktree: task.worktree.clone(),
            passwd: task.passwd.clone(),
            root_id: task.root_id.clone(),
            email: task.email.clone(),
            crypt: CryptoContext::for_repo(repo),
        };
        tokio::spawn(async move {
            let repo_id = job.repo_id.clone();
            let (success, head) = run_merge_job(&deps, job).await;
            let _ = tx.send(Completion::Merge {
                repo_id,
                success,
                head,
            });
        });
    }
}

async fn run_merge_job(deps: &CloneDeps, job: MergeJob) -> (bool, Option<String>) {
    // The restart path can land here without having indexed the worktree.
    let local_root = match &job.root_id {
        Some(root) => root.clone(),
        None => {
            let indexer = deps.indexer.clone();
            let repo_id = job.repo_id.clone();
            let worktree = PathBuf::from(&job.worktree);
            let passwd = job.passwd.clone();
            let indexed = tokio::task::spawn_blocking(move || {
                indexer.index_worktree(&repo_id, &worktree, passwd.as_ref().map(|p| p.as_str()))
            })
            .await;
            match indexed {
                Ok(Ok(root)) => root,
                Ok(Err(e)) => {
                    warn!(repo = short_id(&job.repo_id), err = %e, "worktree indexing failed before merge");
                    return (false, None);
                }
                Err(e) => {
                    warn!(repo = short_id(&job.repo_id), err = %e, "indexing worker panicked");
                    return (false, None);
                }
            }
        }
    };

    let Some(head) = deps.repos.get_branch_head(&job.repo_id, LOCAL_BRANCH).await else {
        warn!(repo = short_id(&job.repo_id), "local branch missing after fetch");
        return (false, None);
    };

    let result = if check_fast_forward(deps, &head, &local_root).await {
        debug!(repo = short_id(&job.repo_id), "fast forward");
        fast_forward_checkout(deps, &head, &local_root, &job).await
    } else {
        real_merge(deps, &head, &local_root, &job).await
    };

    match result {
        Ok(()) => (true, Some(head.id)),
        Err(e) => {
            warn!(repo = short_id(&job.repo_id), err = %e, "merge failed");
            (false, None)
        }
    }
}

/// Walk the remote head's ancestry; the merge is a fast-forward when any
/// ancestor's root tree equals the indexed root of the local worktree.
/// Halts on the first match.
async fn check_fast_forward(deps: &CloneDeps, head: &Commit, root_id: &str) -> bool {
    let mut queue: VecDeque<String> = VecDeque::from([head.id.clone()]);
    let mut seen: HashSet<String> = HashSet::new();
    while let Some(commit_id) = queue.pop_front() {
        if !seen.insert(commit_id.clone()) {
            continue;
        }
        let Some(commit) = deps.repos.get_commit(&commit_id).await else {
            continue;
        };
        if commit.root_id == root_id {
            return true;
        }
        queue.extend(commit.parent_ids.iter().cloned());
    }
    false
}

async fn fast_forward_checkout(
    deps: &CloneDeps,
    head: &Commit,
    local_root: &str,
    job: &MergeJob,
) -> Result<()> {
    // Worktree already matches the remote head.
    if head.root_id == local_root {
        return Ok(());
    }

    let req = UnpackRequest {
        repo_id: job.repo_id.clone(),
        worktree: job.worktree.clone(),
        local_root: local_root.to_string(),
        remote_root: head.root_id.clone(),
        remote_head: head.id.clone(),
        update: true,
        merge: true,
        crypt: job.crypt.clone(),
    };
    let engine = deps.merge.clone();
    tokio::task::spawn_blocking(move || engine.unpack_twoway(&req)).await?
}

async fn real_merge(
    deps: &CloneDeps,
    head: &Commit,
    local_root: &str,
    job: &MergeJob,
) -> Result<()> {
    // Ancestor is the empty tree: everything in the worktree counts as a
    // local addition. Only the worktree is updated here; the next
    // auto-commit cycle reconciles index and commits.
    let req = MergeRequest {
        repo_id: job.repo_id.clone(),
        worktree: job.worktree.clone(),
        ancestor_root: EMPTY_TREE_ID.to_string(),
        local_root: local_root.to_string(),
        remote_root: head.root_id.clone(),
        remote_head: head.id.clone(),
        local_label: job.email.clone(),
        remote_label: head.creator_name.clone(),
        crypt: job.crypt.clone(),
    };
    let engine = deps.merge.clone();
    tokio::task::spawn_blocking(move || engine.merge_recursive(&req)).await?
}
