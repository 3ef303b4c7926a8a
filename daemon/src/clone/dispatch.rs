//! The completion dispatcher.
//!
//! Every collaborator completion funnels through one queue and is consumed
//! serially, so completions for a single task are observed in program order
//! and the dispatcher is the only place a running task advances.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::transfer::TransferOutcome;

use super::task::short_id;
use super::{CloneErrorKind, CloneManager, CloneState};

/// Terminal report from one collaborator about one task.
#[derive(Debug, Clone)]
pub enum Completion {
    /// From the transfer engine; `is_clone` distinguishes clone downloads
    /// from the sync manager's plain fetches.
    Transfer {
        repo_id: String,
        outcome: TransferOutcome,
        is_clone: bool,
    },
    /// From the index job; `None` means indexing failed.
    Index {
        repo_id: String,
        root_id: Option<String>,
    },
    Checkout {
        repo_id: String,
        success: bool,
    },
    /// From the merge job; `head` is the commit the worktree now reflects.
    Merge {
        repo_id: String,
        success: bool,
        head: Option<String>,
    },
}

impl CloneManager {
    pub(super) async fn run_dispatcher(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
    }

    async fn dispatch(&self, event: Completion) {
        match event {
            Completion::Transfer {
                repo_id,
                outcome,
                is_clone,
            } => self.on_transfer_done(&repo_id, outcome, is_clone).await,
            Completion::Index { repo_id, root_id } => self.on_index_done(&repo_id, root_id).await,
            Completion::Checkout { repo_id, success } => {
                self.on_checkout_done(&repo_id, success).await
            }
            Completion::Merge {
                repo_id,
                success,
                head,
            } => self.on_merge_done(&repo_id, success, head).await,
        }
    }

    async fn on_transfer_done(&self, repo_id: &str, outcome: TransferOutcome, is_clone: bool) {
        if !is_clone {
            debug!(repo = short_id(repo_id), "ignoring non-clone transfer completion");
            return;
        }
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(repo_id) else {
            warn!(repo = short_id(repo_id), "transfer completion for unknown clone task");
            return;
        };
        match outcome {
            TransferOutcome::Canceled => {
                self.transition(task, CloneState::Canceled).await;
            }
            TransferOutcome::Error => {
                self.fail(task, CloneErrorKind::Fetch).await;
            }
            TransferOutcome::Success => {
                if task.state == CloneState::CancelPending {
                    // Cancel raced with the download finishing; a canceled
                    // task must never reach done.
                    self.transition(task, CloneState::Canceled).await;
                    return;
                }
                let Some(repo) = self.deps.repos.lookup(repo_id).await else {
                    warn!(repo = short_id(repo_id), "cannot find repo after fetch");
                    self.fail(task, CloneErrorKind::Internal).await;
                    return;
                };
                if let Err(e) = self.deps.repos.set_token(repo_id, &task.token).await {
                    warn!(repo = short_id(repo_id), err = %e, "failed to persist repo token");
                }
                if let Err(e) = self.deps.repos.set_email(repo_id, &task.email).await {
                    warn!(repo = short_id(repo_id), err = %e, "failed to persist repo email");
                }
                if let Err(e) = self
                    .deps
                    .repos
                    .set_relay_info(repo_id, &task.peer_addr, &task.peer_port)
                    .await
                {
                    warn!(repo = short_id(repo_id), err = %e, "failed to persist relay info");
                }
                self.start_checkout_or_merge(task, &repo).await;
            }
        }
    }

    async fn on_index_done(&self, repo_id: &str, root_id: Option<String>) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(repo_id) else {
            warn!(repo = short_id(repo_id), "index completion for unknown clone task");
            return;
        };
        let Some(root_id) = root_id else {
            self.fail(task, CloneErrorKind::Index).await;
            return;
        };
        task.root_id = Some(root_id);

        if task.state == CloneState::CancelPending {
            self.transition(task, CloneState::Canceled).await;
            return;
        }

        match self.add_transfer_task(task).await {
            Ok(()) => self.transition(task, CloneState::Fetch).await,
            Err(e) => {
                warn!(repo = short_id(repo_id), err = %e, "failed to enqueue download");
                self.fail(task, CloneErrorKind::Fetch).await;
            }
        }
    }

    async fn on_checkout_done(&self, repo_id: &str, success: bool) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(repo_id) else {
            warn!(repo = short_id(repo_id), "checkout completion for unknown clone task");
            return;
        };
        if !success {
            self.fail(task, CloneErrorKind::Checkout).await;
            return;
        }
        match task.state {
            CloneState::CancelPending => self.transition(task, CloneState::Canceled).await,
            CloneState::Checkout => self.transition(task, CloneState::Done).await,
            other => {
                error!(
                    repo = short_id(repo_id),
                    state = other.as_str(),
                    "checkout completion in unexpected state"
                );
            }
        }
    }

    async fn on_merge_done(&self, repo_id: &str, success: bool, head: Option<String>) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(repo_id) else {
            warn!(repo = short_id(repo_id), "merge completion for unknown clone task");
            return;
        };
        if !success {
            self.fail(task, CloneErrorKind::Merge).await;
            return;
        }

        // The worktree now holds the merge result; bind it and mark the
        // head even when the task collapses to canceled below, so the
        // repository itself stays consistent.
        if let Err(e) = self.deps.repos.set_worktree(repo_id, &task.worktree).await {
            warn!(repo = short_id(repo_id), err = %e, "failed to bind repo worktree");
        }
        if let Some(head) = head {
            if let Err(e) = self.deps.repos.set_head(repo_id, &head).await {
                warn!(repo = short_id(repo_id), err = %e, "failed to set repo head");
            }
        }

        match task.state {
            CloneState::CancelPending => self.transition(task, CloneState::Canceled).await,
            CloneState::Merge => self.transition(task, CloneState::Done).await,
            other => {
                error!(
                    repo = short_id(repo_id),
                    state = other.as_str(),
                    "merge completion in unexpected state"
                );
            }
        }
    }
}
