//! Short-lived access tokens for the daemon's local web surface.
//!
//! A token grants one operation on one object of one repository for a fixed
//! lifetime. Issued tokens are cached per (repo, object, op, user), so
//! repeated requests reuse the same token until it nears expiry. One-time
//! tokens are consumed by the first successful query.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::DaemonConfig;

/// Never hand out a token with less than this much life left.
const MIN_TOKEN_LIFE_SECS: i64 = 60;

const VALID_OPS: [&str; 9] = [
    "view",
    "download",
    "download-dir",
    "upload",
    "update",
    "upload-blks-api",
    "upload-blks-aj",
    "update-blks-api",
    "update-blks-aj",
];

/// What a token grants.
#[derive(Debug, Clone)]
pub struct AccessInfo {
    pub repo_id: String,
    pub obj_id: String,
    pub op: String,
    pub username: String,
    pub expire_at: i64,
    pub one_time: bool,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    token: String,
    expire_at: i64,
}

#[derive(Default)]
struct Inner {
    /// token -> grant
    by_token: HashMap<String, AccessInfo>,
    /// "(repo obj op user)" -> issued token
    by_key: HashMap<String, IssuedToken>,
}

pub struct WebTokenManager {
    expire: Duration,
    cleanup_interval: Duration,
    inner: Mutex<Inner>,
}

impl WebTokenManager {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            expire: config.web_token_expire,
            cleanup_interval: config.web_token_cleanup_interval,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Spawn the periodic sweep of expired grants.
    pub fn start(self: &Arc<Self>) {
        let mgr = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(mgr.cleanup_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                mgr.clean_expired();
            }
        });
    }

    /// Issue (or reuse) a token for the given grant. `None` when `op` is
    /// not an access operation.
    pub fn get_access_token(
        &self,
        repo_id: &str,
        obj_id: &str,
        op: &str,
        username: &str,
        one_time: bool,
    ) -> Option<String> {
        if !VALID_OPS.contains(&op) {
            return None;
        }

        let key = access_key(repo_id, obj_id, op, username);
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("webtoken store poisoned");

        if let Some(existing) = inner.by_key.get(&key) {
            // Reuse only when the token still has a comfortable lifetime.
            if existing.expire_at - now > MIN_TOKEN_LIFE_SECS {
                return Some(existing.token.clone());
            }
        }

        let token = gen_token(&inner.by_token);
        let expire_at = now + self.expire.as_secs() as i64;
        inner.by_key.insert(
            key,
            IssuedToken {
                token: token.clone(),
                expire_at,
            },
        );
        inner.by_token.insert(
            token.clone(),
            AccessInfo {
                repo_id: repo_id.to_string(),
                obj_id: obj_id.to_string(),
                op: op.to_string(),
                username: username.to_string(),
                expire_at,
                one_time,
            },
        );
        Some(token)
    }

    /// Look up what a token grants. Expired tokens are treated as unknown;
    /// a one-time token is consumed by this call.
    pub fn query_access_token(&self, token: &str) -> Option<AccessInfo> {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("webtoken store poisoned");
        let info = inner.by_token.get(token)?.clone();
        if now >= info.expire_at {
            return None;
        }
        if info.one_time {
            let key = access_key(&info.repo_id, &info.obj_id, &info.op, &info.username);
            inner.by_key.remove(&key);
            inner.by_token.remove(token);
        }
        Some(info)
    }

    /// Drop expired grants from both maps.
    pub fn clean_expired(&self) {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("webtoken store poisoned");
        let before = inner.by_token.len();
        inner.by_token.retain(|_, info| now < info.expire_at);
        inner.by_key.retain(|_, issued| now < issued.expire_at);
        let swept = before - inner.by_token.len();
        if swept > 0 {
            debug!(swept, "expired web access tokens cleaned");
        }
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("webtoken store poisoned");
        (inner.by_token.len(), inner.by_key.len())
    }
}

fn access_key(repo_id: &str, obj_id: &str, op: &str, username: &str) -> String {
    format!("{repo_id} {obj_id} {op} {username}")
}

/// Fresh token that does not collide with any live one.
fn gen_token(by_token: &HashMap<String, AccessInfo>) -> String {
    loop {
        let token = Uuid::new_v4().to_string();
        if !by_token.contains_key(&token) {
            return token;
        }
    }
}
