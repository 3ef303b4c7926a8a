//! Periodic re-examination of tasks parked on peer connectivity.
//!
//! Ticks are independent and the check is idempotent, so a missed tick
//! only delays a task by one interval.

use std::sync::Arc;

use super::{CloneManager, CloneState};

impl CloneManager {
    pub(super) async fn run_connect_watcher(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.connect_check_interval);
        loop {
            interval.tick().await;
            self.check_connect_pulse().await;
        }
    }

    async fn check_connect_pulse(&self) {
        let waiting: Vec<(String, String)> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|t| t.state == CloneState::Connect)
                .map(|t| (t.repo_id.clone(), t.peer_id.clone()))
                .collect()
        };

        for (repo_id, peer_id) in waiting {
            if !self.is_peer_connected(&peer_id).await {
                continue;
            }
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&repo_id) {
                // Re-check under the write lock: a cancel may have landed
                // between the two lock acquisitions.
                if task.state == CloneState::Connect {
                    self.start_index_or_transfer(task).await;
                }
            }
        }
    }
}
