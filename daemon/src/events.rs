use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Broadcasts JSON notification strings to every connected frontend.
///
/// Fire-and-forget: having no subscribers is the normal idle state.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Send a notification to all connected clients.
    pub fn broadcast(&self, method: &str, params: Value) {
        let notification = json!({
            "method": method,
            "params": params
        });
        let _ = self
            .tx
            .send(serde_json::to_string(&notification).unwrap_or_default());
    }

    /// Every clone state transition is pushed with the wire-stable state
    /// and error strings, so frontends can poll-free track progress.
    pub fn clone_state_changed(&self, repo_id: &str, state: &str, error: &str) {
        self.broadcast(
            "clone.stateChanged",
            json!({
                "repoId": repo_id,
                "state": state,
                "error": error,
            }),
        );
    }

    /// Subscribe to all broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
