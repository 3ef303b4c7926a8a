//! Peer connectivity seam.
//!
//! The daemon's networking layer owns dialing and session keep-alive; the
//! clone manager only asks whether a relay is reachable and registers new
//! relays it learns about at admission time.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerNetState {
    Down,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: String,
    pub net_state: PeerNetState,
}

impl PeerInfo {
    pub fn is_connected(&self) -> bool {
        self.net_state == PeerNetState::Connected
    }
}

#[async_trait]
pub trait PeerLayer: Send + Sync {
    /// `None` when the peer is not known to the networking layer at all.
    async fn get_peer(&self, peer_id: &str) -> Option<PeerInfo>;

    /// Register a relay so the networking layer starts dialing it.
    /// Connection progress is observed via [`get_peer`](Self::get_peer).
    async fn add_peer(&self, peer_id: &str, addr: &str, port: &str) -> Result<()>;
}
