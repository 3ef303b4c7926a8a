//! Worktree path resolution.
//!
//! Turns a caller-supplied target directory into a usable, conflict-free
//! path. Probe mode (used by `gen_default_worktree`) may synthesize `-1`,
//! `-2`, … alternatives; commit mode (used by admission) rejects conflicts
//! instead and creates the directory.

use std::collections::HashMap;
use std::fs;
use std::io;

use super::{CloneError, CloneManager, CloneTask};

/// Give up synthesizing suffixed alternatives after this many attempts.
const SUFFIX_CAP: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResolveMode {
    /// May synthesize an unused alternative; touches nothing on disk.
    Probe,
    /// Must reject conflicts; creates the directory (parents included).
    Commit,
}

impl CloneManager {
    pub(super) async fn make_worktree(
        &self,
        tasks: &HashMap<String, CloneTask>,
        candidate: &str,
        mode: ResolveMode,
    ) -> Result<String, CloneError> {
        let wt = strip_trailing_separators(candidate);

        let target = match fs::symlink_metadata(&wt) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => wt,
            Ok(md) if md.is_dir() => {
                if self.is_worktree_taken(tasks, &wt).await {
                    match mode {
                        ResolveMode::Commit => return Err(CloneError::AlreadyInSync),
                        ResolveMode::Probe => try_worktree(&wt).ok_or(CloneError::InvalidDir)?,
                    }
                } else {
                    // An existing, unclaimed directory is used as-is.
                    return Ok(wt);
                }
            }
            // A file, dangling link, or unreadable path.
            _ => match mode {
                ResolveMode::Commit => return Err(CloneError::InvalidDir),
                ResolveMode::Probe => try_worktree(&wt).ok_or(CloneError::InvalidDir)?,
            },
        };

        if mode == ResolveMode::Commit {
            fs::create_dir_all(&target).map_err(CloneError::WorktreeCreate)?;
        }
        Ok(target)
    }

    /// A path conflicts iff it is the worktree of a known repository or of
    /// another task that has not finished.
    async fn is_worktree_taken(&self, tasks: &HashMap<String, CloneTask>, path: &str) -> bool {
        for repo in self.deps.repos.list().await {
            if repo.worktree.as_deref() == Some(path) {
                return true;
            }
        }
        tasks
            .values()
            .any(|t| !t.is_terminal() && t.worktree == path)
    }
}

/// First unused `{base}-{n}` path, counting up from 1.
fn try_worktree(base: &str) -> Option<String> {
    let mut n: u32 = 1;
    loop {
        let alt = format!("{base}-{n}");
        if fs::symlink_metadata(&alt).is_err() {
            return Some(alt);
        }
        if n == SUFFIX_CAP {
            return None;
        }
        n += 1;
    }
}

pub(super) fn strip_trailing_separators(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        // "/" and friends strip to nothing; keep the original.
        path.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Weak integrity check at admission: the worktree basename must begin with
/// the repository display name, so a clone cannot silently target an
/// unrelated directory.
pub(super) fn worktree_name_matches(worktree: &str, repo_name: &str) -> bool {
    let stripped = strip_trailing_separators(worktree);
    let base = stripped.rsplit(['/', '\\']).next().unwrap_or(&stripped);
    base.starts_with(repo_name)
}

/// "Empty" for the checkout-vs-merge decision means the directory exists
/// and has no entries; an unreadable or missing path counts as empty.
pub(super) fn is_non_empty_directory(path: &str) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}
