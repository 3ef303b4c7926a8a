//! Clone task lifecycle manager.
//!
//! Drives a requested repository from "the user wants it" to "its worktree
//! is on disk and live": peer connectivity, optional pre-indexing of an
//! existing directory, bulk transfer, and checkout or merge. Pending tasks
//! are durable — an interrupted clone resumes after restart.
//!
//! Concurrency model: the task map is the single point of mutation, guarded
//! by one `RwLock`; collaborator completions funnel through one mpsc queue
//! consumed serially by the dispatcher task. Long-running work (indexing,
//! merging) happens on workers that only ever touch their own inputs and
//! report back through the queue.

mod dispatch;
mod machine;
mod merge;
mod task;
mod watcher;
mod worktree;

pub use dispatch::Completion;
pub use task::{CloneErrorKind, CloneState, CloneTask, CloneTaskView, Passwd};
pub use task::{PEER_ID_LEN, REPO_ID_LEN};

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::config::DaemonConfig;
use crate::events::EventBroadcaster;
use crate::peer::PeerLayer;
use crate::repo::RepoStore;
use crate::storage::Storage;
use crate::transfer::TransferEngine;
use crate::worktree::{CheckoutEngine, Indexer, MergeEngine};

use worktree::ResolveMode;

/// Handles to the subsystems the clone manager drives. Injected at
/// construction; the manager owns no I/O machinery of its own.
#[derive(Clone)]
pub struct CloneDeps {
    pub repos: Arc<dyn RepoStore>,
    pub transfer: Arc<dyn TransferEngine>,
    pub indexer: Arc<dyn Indexer>,
    pub checkout: Arc<dyn CheckoutEngine>,
    pub merge: Arc<dyn MergeEngine>,
    pub peers: Arc<dyn PeerLayer>,
}

/// Errors returned by the caller-facing API.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("malformed repository id")]
    InvalidRepoId,
    #[error("repo already exists")]
    RepoExists,
    #[error("task is already in progress")]
    DuplicateTask,
    #[error("invalid local directory name")]
    InvalidDirName,
    #[error("already in sync")]
    AlreadyInSync,
    #[error("invalid local directory")]
    InvalidDir,
    #[error("failed to create worktree directory")]
    WorktreeCreate(#[source] std::io::Error),
    #[error("task not found")]
    TaskNotFound,
    #[error("cannot cancel a task that is not running")]
    NotCancelable,
    #[error("cannot remove a running task")]
    TaskRunning,
    #[error("failed to persist task")]
    Persist(#[source] anyhow::Error),
}

pub struct CloneManager {
    storage: Arc<Storage>,
    broadcaster: Arc<EventBroadcaster>,
    deps: CloneDeps,
    connect_check_interval: Duration,
    /// repo_id -> task. Tasks stay here after reaching a terminal state
    /// until the caller removes them.
    tasks: RwLock<HashMap<String, CloneTask>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    /// Taken by [`start`](Self::start).
    completions_rx: StdMutex<Option<mpsc::UnboundedReceiver<Completion>>>,
}

impl CloneManager {
    pub fn new(
        config: &DaemonConfig,
        storage: Arc<Storage>,
        broadcaster: Arc<EventBroadcaster>,
        deps: CloneDeps,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            storage,
            broadcaster,
            deps,
            connect_check_interval: config.connect_check_interval,
            tasks: RwLock::new(HashMap::new()),
            completions_tx,
            completions_rx: StdMutex::new(Some(completions_rx)),
        }
    }

    /// Sender used to deliver completion events into the dispatcher. The
    /// transfer engine is wired up with this at daemon startup.
    pub fn completion_sender(&self) -> mpsc::UnboundedSender<Completion> {
        self.completions_tx.clone()
    }

    /// Rehydrate pending tasks from the durable store and classify each one
    /// (see the restart rules in [`machine`]). Returns how many rows were
    /// picked up. Call before [`start`](Self::start).
    pub async fn init(&self) -> Result<usize> {
        let rows = self.storage.scan_clone_tasks().await?;
        let count = rows.len();
        for row in rows {
            self.rehydrate(CloneTask::from_row(row)).await;
        }
        if count > 0 {
            info!(count, "rehydrated pending clone tasks");
        }
        Ok(count)
    }

    /// Spawn the completion dispatcher and the connectivity watcher.
    /// Idempotent: only the first call spawns anything.
    pub fn start(self: &Arc<Self>) {
        let rx = self
            .completions_rx
            .lock()
            .expect("completion receiver poisoned")
            .take();
        if let Some(rx) = rx {
            tokio::spawn(self.clone().run_dispatcher(rx));
            tokio::spawn(self.clone().run_connect_watcher());
        }
    }

    // ─── Caller API ──────────────────────────────────────────────────────────

    /// Admit a new clone. The task is durable once this returns; progress
    /// is observed via [`get_task`](Self::get_task) and the
    /// `clone.stateChanged` push event.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_task(
        &self,
        repo_id: &str,
        peer_id: &str,
        repo_name: &str,
        token: &str,
        passwd: Option<&str>,
        worktree: &str,
        peer_addr: &str,
        peer_port: &str,
        email: &str,
    ) -> Result<String, CloneError> {
        if repo_id.len() != REPO_ID_LEN {
            return Err(CloneError::InvalidRepoId);
        }

        let repo = self.deps.repos.lookup(repo_id).await;
        if repo.as_ref().is_some_and(|r| r.head.is_some()) {
            return Err(CloneError::RepoExists);
        }

        let mut tasks = self.tasks.write().await;
        if tasks.get(repo_id).is_some_and(|t| !t.is_terminal()) {
            return Err(CloneError::DuplicateTask);
        }
        if !worktree::worktree_name_matches(worktree, repo_name) {
            return Err(CloneError::InvalidDirName);
        }
        let resolved = self
            .make_worktree(&tasks, worktree, ResolveMode::Commit)
            .await?;

        let task = CloneTask::new(
            repo_id, peer_id, repo_name, token, passwd, &resolved, peer_addr, peer_port, email,
        );
        self.storage
            .upsert_clone_task(&task.to_row())
            .await
            .map_err(CloneError::Persist)?;

        // A previous terminal task for this repo is replaced.
        tasks.insert(repo_id.to_string(), task);
        if let Some(task) = tasks.get_mut(repo_id) {
            match repo {
                // Objects were fetched on an earlier attempt but checkout
                // never finished; go straight to materialization.
                Some(repo) => self.start_checkout_or_merge(task, &repo).await,
                None => {
                    if self.is_peer_connected(&task.peer_id).await {
                        self.start_index_or_transfer(task).await;
                    } else {
                        self.start_connect(task).await;
                    }
                }
            }
        }
        Ok(repo_id.to_string())
    }

    /// Request cancellation. Tasks not yet doing work cancel immediately;
    /// a running download is told to stop; an in-flight index/checkout/
    /// merge job runs to completion and is collapsed to canceled by the
    /// dispatcher.
    pub async fn cancel_task(&self, repo_id: &str) -> Result<(), CloneError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(repo_id).ok_or(CloneError::TaskNotFound)?;
        match task.state {
            CloneState::Init | CloneState::Connect => {
                self.transition(task, CloneState::Canceled).await;
            }
            CloneState::Fetch => {
                if let Some(handle) = task.tx_handle.clone() {
                    self.deps.transfer.cancel(&handle).await;
                }
                self.transition(task, CloneState::CancelPending).await;
            }
            CloneState::Index | CloneState::Checkout | CloneState::Merge => {
                self.transition(task, CloneState::CancelPending).await;
            }
            CloneState::CancelPending => {}
            CloneState::Done | CloneState::Error | CloneState::Canceled => {
                return Err(CloneError::NotCancelable);
            }
        }
        Ok(())
    }

    /// Drop a finished task from memory. A no-op when the task does not
    /// exist; rejected while the task is still running.
    pub async fn remove_task(&self, repo_id: &str) -> Result<(), CloneError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get(repo_id) else {
            return Ok(());
        };
        if !task.is_terminal() {
            return Err(CloneError::TaskRunning);
        }
        if let Some(handle) = task.tx_handle.clone() {
            self.deps.transfer.remove(&handle).await;
        }
        // The durable row was already pruned by the terminal transition.
        tasks.remove(repo_id);
        Ok(())
    }

    pub async fn get_task(&self, repo_id: &str) -> Option<CloneTaskView> {
        self.tasks.read().await.get(repo_id).map(CloneTaskView::from)
    }

    pub async fn list_tasks(&self) -> Vec<CloneTaskView> {
        self.tasks
            .read()
            .await
            .values()
            .map(CloneTaskView::from)
            .collect()
    }

    /// Produce a conflict-free worktree path under `worktree_parent`,
    /// suitable for [`add_task`](Self::add_task). Falls back to the naive
    /// join rather than failing.
    pub async fn gen_default_worktree(&self, worktree_parent: &Path, repo_name: &str) -> String {
        let candidate = worktree_parent
            .join(repo_name)
            .to_string_lossy()
            .into_owned();
        let tasks = self.tasks.read().await;
        match self
            .make_worktree(&tasks, &candidate, ResolveMode::Probe)
            .await
        {
            Ok(wt) => wt,
            Err(_) => candidate,
        }
    }

    // ─── Restart ─────────────────────────────────────────────────────────────

    async fn rehydrate(&self, task: CloneTask) {
        let repo_id = task.repo_id.clone();
        let repo = self.deps.repos.lookup(&repo_id).await;
        let mut tasks = self.tasks.write().await;
        tasks.insert(repo_id.clone(), task);
        let Some(task) = tasks.get_mut(&repo_id) else {
            return;
        };
        match repo {
            Some(repo) if repo.head.is_some() => {
                // The previous run finished but died before pruning the
                // row; mark done and let the transition prune it now.
                self.transition(task, CloneState::Done).await;
            }
            // Objects already fetched; only materialization is left.
            Some(repo) => self.start_checkout_or_merge(task, &repo).await,
            None => {
                if self.is_peer_connected(&task.peer_id).await {
                    self.start_index_or_transfer(task).await;
                } else {
                    self.start_connect(task).await;
                }
            }
        }
    }
}
