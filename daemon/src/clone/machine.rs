//! State transitions and the work each one kicks off.
//!
//! Transitions into a terminal state prune the durable row *before* the new
//! state becomes visible to queries, so a caller never observes a finished
//! task that still has a pending row.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::repo::RepoRecord;
use crate::transfer::{DEFAULT_BRANCH, FETCH_HEAD_REF};

use super::task::short_id;
use super::worktree::is_non_empty_directory;
use super::{CloneErrorKind, CloneManager, CloneState, CloneTask, Completion};

impl CloneManager {
    pub(super) async fn transition(&self, task: &mut CloneTask, next: CloneState) {
        info!(
            repo = short_id(&task.repo_id),
            from = task.state.as_str(),
            to = next.as_str(),
            "clone state transition"
        );
        if next.is_terminal() {
            // Not retried on failure; the in-memory state still holds and a
            // stale row only costs a redundant restart classification.
            if let Err(e) = self.storage.delete_clone_task(&task.repo_id).await {
                warn!(
                    repo = short_id(&task.repo_id),
                    err = %e,
                    "failed to delete clone task row"
                );
            }
        }
        task.state = next;
        self.broadcaster
            .clone_state_changed(&task.repo_id, task.state.as_str(), task.error.as_str());
    }

    pub(super) async fn fail(&self, task: &mut CloneTask, kind: CloneErrorKind) {
        warn!(
            repo = short_id(&task.repo_id),
            from = task.state.as_str(),
            error = kind.as_str(),
            "clone failed"
        );
        if let Err(e) = self.storage.delete_clone_task(&task.repo_id).await {
            warn!(
                repo = short_id(&task.repo_id),
                err = %e,
                "failed to delete clone task row"
            );
        }
        task.state = CloneState::Error;
        task.error = kind;
        self.broadcaster
            .clone_state_changed(&task.repo_id, task.state.as_str(), task.error.as_str());
    }

    // ─── Connect ─────────────────────────────────────────────────────────────

    pub(super) async fn is_peer_connected(&self, peer_id: &str) -> bool {
        self.deps
            .peers
            .get_peer(peer_id)
            .await
            .is_some_and(|p| p.is_connected())
    }

    /// Park the task until the watcher sees the peer connected. A relay the
    /// networking layer has never heard of is registered first.
    pub(super) async fn start_connect(&self, task: &mut CloneTask) {
        if self.deps.peers.get_peer(&task.peer_id).await.is_none() {
            info!(
                peer = short_id(&task.peer_id),
                addr = %task.peer_addr,
                port = %task.peer_port,
                "adding relay before clone"
            );
            if let Err(e) = self
                .deps
                .peers
                .add_peer(&task.peer_id, &task.peer_addr, &task.peer_port)
                .await
            {
                warn!(peer = short_id(&task.peer_id), err = %e, "failed to register relay");
            }
        }
        self.transition(task, CloneState::Connect).await;
    }

    // ─── Index / fetch ───────────────────────────────────────────────────────

    /// A pre-populated worktree must be indexed before fetching so the
    /// merge side knows what was already there; an empty one goes straight
    /// to transfer.
    pub(super) async fn start_index_or_transfer(&self, task: &mut CloneTask) {
        if is_non_empty_directory(&task.worktree) {
            self.transition(task, CloneState::Index).await;
            self.spawn_index_job(task);
        } else {
            match self.add_transfer_task(task).await {
                Ok(()) => self.transition(task, CloneState::Fetch).await,
                Err(e) => {
                    warn!(repo = short_id(&task.repo_id), err = %e, "failed to enqueue download");
                    self.fail(task, CloneErrorKind::Fetch).await;
                }
            }
        }
    }

    pub(super) async fn add_transfer_task(&self, task: &mut CloneTask) -> anyhow::Result<()> {
        let handle = self
            .deps
            .transfer
            .start_download(
                &task.repo_id,
                &task.peer_id,
                FETCH_HEAD_REF,
                DEFAULT_BRANCH,
                &task.token,
            )
            .await?;
        task.tx_handle = Some(handle);
        Ok(())
    }

    fn spawn_index_job(&self, task: &CloneTask) {
        let indexer = self.deps.indexer.clone();
        let tx = self.completions_tx.clone();
        let repo_id = task.repo_id.clone();
        let worktree = PathBuf::from(&task.worktree);
        let passwd = task.passwd.clone();
        tokio::task::spawn_blocking(move || {
            let root_id =
                match indexer.index_worktree(&repo_id, &worktree, passwd.as_ref().map(|p| p.as_str()))
                {
                    Ok(root) => Some(root),
                    Err(e) => {
                        warn!(repo = short_id(&repo_id), err = %e, "worktree indexing failed");
                        None
                    }
                };
            let _ = tx.send(Completion::Index { repo_id, root_id });
        });
    }

    // ─── Checkout / merge ────────────────────────────────────────────────────

    /// Materialize the fetched repository: clean checkout into an empty
    /// worktree, merge into a non-empty one. An encrypted repository has
    /// its password verified and installed first.
    pub(super) async fn start_checkout_or_merge(&self, task: &mut CloneTask, repo: &RepoRecord) {
        if repo.encrypted {
            let Some(passwd) = task.passwd.clone() else {
                warn!(repo = short_id(&task.repo_id), "password is empty for encrypted repo");
                self.fail(task, CloneErrorKind::Password).await;
                return;
            };
            if repo.enc_version >= 1 {
                match self
                    .deps
                    .repos
                    .verify_passwd(&task.repo_id, passwd.as_str())
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(repo = short_id(&task.repo_id), "incorrect password");
                        self.fail(task, CloneErrorKind::Password).await;
                        return;
                    }
                    Err(e) => {
                        warn!(repo = short_id(&task.repo_id), err = %e, "password verification failed");
                        self.fail(task, CloneErrorKind::Password).await;
                        return;
                    }
                }
            }
            if let Err(e) = self
                .deps
                .repos
                .set_passwd(&task.repo_id, passwd.as_str())
                .await
            {
                warn!(repo = short_id(&task.repo_id), err = %e, "failed to install repo password");
                self.fail(task, CloneErrorKind::Internal).await;
                return;
            }
        }

        if is_non_empty_directory(&task.worktree) {
            self.transition(task, CloneState::Merge).await;
            self.spawn_merge_job(task, repo);
        } else {
            self.transition(task, CloneState::Checkout).await;
            self.spawn_checkout_job(task);
        }
    }

    fn spawn_checkout_job(&self, task: &CloneTask) {
        let checkout = self.deps.checkout.clone();
        let tx = self.completions_tx.clone();
        let repo_id = task.repo_id.clone();
        let worktree = PathBuf::from(&task.worktree);
        tokio::spawn(async move {
            let success = match checkout.checkout(&repo_id, &worktree).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(repo = short_id(&repo_id), err = %e, "checkout failed");
                    false
                }
            };
            let _ = tx.send(Completion::Checkout { repo_id, success });
        });
    }
}
