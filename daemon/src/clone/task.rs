//! Clone task record and its lifecycle vocabulary.

use std::fmt;

use serde::Serialize;

use crate::storage::CloneTaskRow;

/// Repository ids are fixed-width content ids.
pub const REPO_ID_LEN: usize = 36;
/// Peer ids are fixed-width key fingerprints.
pub const PEER_ID_LEN: usize = 40;

// ─── States ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneState {
    Init,
    Connect,
    Index,
    Fetch,
    Checkout,
    Merge,
    Done,
    Error,
    CancelPending,
    Canceled,
}

impl CloneState {
    /// Wire-stable state name. Frontends match on these strings, so they
    /// must never change ("canceling" is the historical spelling of the
    /// cancel-pending state).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connect => "connect",
            Self::Index => "index",
            Self::Fetch => "fetch",
            Self::Checkout => "checkout",
            Self::Merge => "merge",
            Self::Done => "done",
            Self::Error => "error",
            Self::CancelPending => "canceling",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }
}

impl fmt::Display for CloneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Error kinds ─────────────────────────────────────────────────────────────

/// What failed when a task ends in the error state. `Connect` is reserved
/// for future connect-failure reporting and is currently never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneErrorKind {
    Ok,
    Connect,
    Index,
    Fetch,
    Password,
    Checkout,
    Merge,
    Internal,
}

impl CloneErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Connect => "connect",
            Self::Index => "index",
            Self::Fetch => "fetch",
            Self::Password => "password",
            Self::Checkout => "checkout",
            Self::Merge => "merge",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for CloneErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Password handling ───────────────────────────────────────────────────────

/// Repository password, held in memory only for the task's lifetime.
/// The buffer is zeroed on drop and never printed.
#[derive(Clone)]
pub struct Passwd(String);

impl Passwd {
    pub fn new(passwd: impl Into<String>) -> Self {
        Self(passwd.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for Passwd {
    fn drop(&mut self) {
        // Writing NUL bytes keeps the buffer valid UTF-8.
        for b in unsafe { self.0.as_bytes_mut() } {
            *b = 0;
        }
    }
}

impl fmt::Debug for Passwd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passwd(****)")
    }
}

// ─── Task record ─────────────────────────────────────────────────────────────

/// One clone, from admission until the caller removes it. Owned by the
/// manager's task map and mutated only on the control path.
#[derive(Debug, Clone)]
pub struct CloneTask {
    pub repo_id: String,
    pub peer_id: String,
    pub repo_name: String,
    pub token: String,
    pub passwd: Option<Passwd>,
    pub worktree: String,
    pub peer_addr: String,
    pub peer_port: String,
    pub email: String,
    /// Transfer handle; set while a download is in flight and kept until
    /// the task is removed so the download can be discarded with it.
    pub tx_handle: Option<String>,
    /// Root tree id of the pre-existing worktree contents; set once the
    /// index job has run.
    pub root_id: Option<String>,
    pub state: CloneState,
    pub error: CloneErrorKind,
}

impl CloneTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_id: &str,
        peer_id: &str,
        repo_name: &str,
        token: &str,
        passwd: Option<&str>,
        worktree: &str,
        peer_addr: &str,
        peer_port: &str,
        email: &str,
    ) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            peer_id: peer_id.to_string(),
            repo_name: repo_name.to_string(),
            token: token.to_string(),
            passwd: passwd.map(Passwd::new),
            worktree: worktree.to_string(),
            peer_addr: peer_addr.to_string(),
            peer_port: peer_port.to_string(),
            email: email.to_string(),
            tx_handle: None,
            root_id: None,
            state: CloneState::Init,
            error: CloneErrorKind::Ok,
        }
    }

    pub fn from_row(row: CloneTaskRow) -> Self {
        Self::new(
            &row.repo_id,
            &row.dest_id,
            &row.repo_name,
            &row.token,
            row.passwd.as_deref(),
            &row.worktree_parent,
            &row.server_addr,
            &row.server_port,
            &row.email,
        )
    }

    pub fn to_row(&self) -> CloneTaskRow {
        CloneTaskRow {
            repo_id: self.repo_id.clone(),
            repo_name: self.repo_name.clone(),
            token: self.token.clone(),
            dest_id: self.peer_id.clone(),
            worktree_parent: self.worktree.clone(),
            passwd: self.passwd.as_ref().map(|p| p.as_str().to_string()),
            server_addr: self.peer_addr.clone(),
            server_port: self.peer_port.clone(),
            email: self.email.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Abbreviated repo id for log lines.
pub(crate) fn short_id(repo_id: &str) -> &str {
    repo_id.get(..8).unwrap_or(repo_id)
}

// ─── Snapshot view ───────────────────────────────────────────────────────────

/// Caller-facing snapshot. Deliberately omits the token and password.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneTaskView {
    pub repo_id: String,
    pub repo_name: String,
    pub peer_id: String,
    pub worktree: String,
    pub state: String,
    pub error: String,
}

impl From<&CloneTask> for CloneTaskView {
    fn from(task: &CloneTask) -> Self {
        Self {
            repo_id: task.repo_id.clone(),
            repo_name: task.repo_name.clone(),
            peer_id: task.peer_id.clone(),
            worktree: task.worktree.clone(),
            state: task.state.as_str().to_string(),
            error: task.error.as_str().to_string(),
        }
    }
}
