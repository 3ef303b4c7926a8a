//! Mock collaborators and a ready-wired environment for clone manager
//! integration tests. The mocks model the external subsystems (repo store,
//! transfer engine, peer layer, worktree engines), so tests drive the full
//! lifecycle without any real networking or object store.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use eddyd::clone::{CloneDeps, CloneManager, Completion};
use eddyd::config::DaemonConfig;
use eddyd::events::EventBroadcaster;
use eddyd::peer::{PeerInfo, PeerLayer, PeerNetState};
use eddyd::repo::{Commit, RepoRecord, RepoStore};
use eddyd::storage::Storage;
use eddyd::transfer::TransferEngine;
use eddyd::worktree::{CheckoutEngine, Indexer, MergeEngine, MergeRequest, UnpackRequest};

pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env().add_directive("eddyd=debug".parse().unwrap()))
        .try_init();
}

pub fn repo_id(c: char) -> String {
    c.to_string().repeat(36)
}

pub fn peer_id(c: char) -> String {
    c.to_string().repeat(40)
}

/// A plain, unencrypted repo record with no head yet.
pub fn plain_repo(id: &str, name: &str) -> RepoRecord {
    RepoRecord {
        id: id.to_string(),
        name: name.to_string(),
        head: None,
        worktree: None,
        encrypted: false,
        enc_version: 0,
        enc_key: Vec::new(),
        enc_iv: Vec::new(),
    }
}

pub fn commit(id: &str, root_id: &str, parents: &[&str]) -> Commit {
    Commit {
        id: id.to_string(),
        root_id: root_id.to_string(),
        creator_name: "remote-author".to_string(),
        parent_ids: parents.iter().map(|p| p.to_string()).collect(),
    }
}

// ─── Repo store ──────────────────────────────────────────────────────────────

pub struct MockRepoStore {
    pub repos: Mutex<HashMap<String, RepoRecord>>,
    pub commits: Mutex<HashMap<String, Commit>>,
    /// (repo_id, branch) -> commit id
    pub branch_heads: Mutex<HashMap<(String, String), String>>,
    /// Result of `verify_passwd`.
    pub passwd_ok: Mutex<bool>,
    pub verify_calls: Mutex<u32>,
    pub set_passwd_fails: Mutex<bool>,
    /// Every mutator call, e.g. `"set_token:<repo>:<value>"`.
    pub mutations: Mutex<Vec<String>>,
}

impl MockRepoStore {
    pub fn new() -> Self {
        Self {
            repos: Mutex::new(HashMap::new()),
            commits: Mutex::new(HashMap::new()),
            branch_heads: Mutex::new(HashMap::new()),
            passwd_ok: Mutex::new(true),
            verify_calls: Mutex::new(0),
            set_passwd_fails: Mutex::new(false),
            mutations: Mutex::new(Vec::new()),
        }
    }

    pub fn insert_repo(&self, repo: RepoRecord) {
        self.repos.lock().unwrap().insert(repo.id.clone(), repo);
    }

    pub fn insert_commit(&self, c: Commit) {
        self.commits.lock().unwrap().insert(c.id.clone(), c);
    }

    pub fn set_branch_head(&self, repo_id: &str, branch: &str, commit_id: &str) {
        self.branch_heads
            .lock()
            .unwrap()
            .insert((repo_id.to_string(), branch.to_string()), commit_id.to_string());
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn verify_call_count(&self) -> u32 {
        *self.verify_calls.lock().unwrap()
    }

    fn record(&self, entry: String) {
        self.mutations.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl RepoStore for MockRepoStore {
    async fn lookup(&self, repo_id: &str) -> Option<RepoRecord> {
        self.repos.lock().unwrap().get(repo_id).cloned()
    }

    async fn list(&self) -> Vec<RepoRecord> {
        self.repos.lock().unwrap().values().cloned().collect()
    }

    async fn get_branch_head(&self, repo_id: &str, branch: &str) -> Option<Commit> {
        let id = self
            .branch_heads
            .lock()
            .unwrap()
            .get(&(repo_id.to_string(), branch.to_string()))
            .cloned()?;
        self.commits.lock().unwrap().get(&id).cloned()
    }

    async fn get_commit(&self, commit_id: &str) -> Option<Commit> {
        self.commits.lock().unwrap().get(commit_id).cloned()
    }

    async fn set_head(&self, repo_id: &str, commit_id: &str) -> Result<()> {
        if let Some(repo) = self.repos.lock().unwrap().get_mut(repo_id) {
            repo.head = Some(commit_id.to_string());
        }
        self.record(format!("set_head:{repo_id}:{commit_id}"));
        Ok(())
    }

    async fn set_worktree(&self, repo_id: &str, worktree: &str) -> Result<()> {
        if let Some(repo) = self.repos.lock().unwrap().get_mut(repo_id) {
            repo.worktree = Some(worktree.to_string());
        }
        self.record(format!("set_worktree:{repo_id}:{worktree}"));
        Ok(())
    }

    async fn set_token(&self, repo_id: &str, token: &str) -> Result<()> {
        self.record(format!("set_token:{repo_id}:{token}"));
        Ok(())
    }

    async fn set_email(&self, repo_id: &str, email: &str) -> Result<()> {
        self.record(format!("set_email:{repo_id}:{email}"));
        Ok(())
    }

    async fn set_relay_info(&self, repo_id: &str, addr: &str, port: &str) -> Result<()> {
        self.record(format!("set_relay_info:{repo_id}:{addr}:{port}"));
        Ok(())
    }

    async fn verify_passwd(&self, _repo_id: &str, _passwd: &str) -> Result<bool> {
        *self.verify_calls.lock().unwrap() += 1;
        Ok(*self.passwd_ok.lock().unwrap())
    }

    async fn set_passwd(&self, repo_id: &str, _passwd: &str) -> Result<()> {
        if *self.set_passwd_fails.lock().unwrap() {
            return Err(anyhow!("keyring unavailable"));
        }
        self.record(format!("set_passwd:{repo_id}"));
        Ok(())
    }
}

// ─── Transfer engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DownloadCall {
    pub repo_id: String,
    pub peer_id: String,
    pub fetch_head_ref: String,
    pub branch: String,
    pub token: String,
}

pub struct MockTransferEngine {
    pub downloads: Mutex<Vec<DownloadCall>>,
    pub cancels: Mutex<Vec<String>>,
    pub removes: Mutex<Vec<String>>,
    pub fail_start: Mutex<bool>,
    next_handle: Mutex<u32>,
}

impl MockTransferEngine {
    pub fn new() -> Self {
        Self {
            downloads: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            removes: Mutex::new(Vec::new()),
            fail_start: Mutex::new(false),
            next_handle: Mutex::new(0),
        }
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait]
impl TransferEngine for MockTransferEngine {
    async fn start_download(
        &self,
        repo_id: &str,
        peer_id: &str,
        fetch_head_ref: &str,
        branch: &str,
        token: &str,
    ) -> Result<String> {
        if *self.fail_start.lock().unwrap() {
            return Err(anyhow!("download rejected"));
        }
        self.downloads.lock().unwrap().push(DownloadCall {
            repo_id: repo_id.to_string(),
            peer_id: peer_id.to_string(),
            fetch_head_ref: fetch_head_ref.to_string(),
            branch: branch.to_string(),
            token: token.to_string(),
        });
        let mut next = self.next_handle.lock().unwrap();
        *next += 1;
        Ok(format!("tx-{}", *next))
    }

    async fn cancel(&self, handle: &str) {
        self.cancels.lock().unwrap().push(handle.to_string());
    }

    async fn remove(&self, handle: &str) {
        self.removes.lock().unwrap().push(handle.to_string());
    }
}

// ─── Worktree engines ────────────────────────────────────────────────────────

pub struct MockIndexer {
    /// `None` makes indexing fail.
    pub root_id: Mutex<Option<String>>,
    /// Simulate a long-running job (runs on a blocking worker).
    pub delay: Mutex<Option<Duration>>,
    pub calls: Mutex<u32>,
}

impl MockIndexer {
    pub fn new(root_id: &str) -> Self {
        Self {
            root_id: Mutex::new(Some(root_id.to_string())),
            delay: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl Indexer for MockIndexer {
    fn index_worktree(
        &self,
        _repo_id: &str,
        _worktree: &Path,
        _passwd: Option<&str>,
    ) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.root_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("cannot read worktree"))
    }
}

pub struct MockCheckoutEngine {
    pub fail: Mutex<bool>,
    pub delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<(String, PathBuf)>>,
}

impl MockCheckoutEngine {
    pub fn new() -> Self {
        Self {
            fail: Mutex::new(false),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CheckoutEngine for MockCheckoutEngine {
    async fn checkout(&self, repo_id: &str, worktree: &Path) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((repo_id.to_string(), worktree.to_path_buf()));
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("checkout engine failed"));
        }
        Ok(())
    }
}

pub struct MockMergeEngine {
    pub fail: Mutex<bool>,
    pub recursive_calls: Mutex<Vec<MergeRequest>>,
    pub unpack_calls: Mutex<Vec<UnpackRequest>>,
}

impl MockMergeEngine {
    pub fn new() -> Self {
        Self {
            fail: Mutex::new(false),
            recursive_calls: Mutex::new(Vec::new()),
            unpack_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn recursive_count(&self) -> usize {
        self.recursive_calls.lock().unwrap().len()
    }

    pub fn unpack_count(&self) -> usize {
        self.unpack_calls.lock().unwrap().len()
    }
}

impl MergeEngine for MockMergeEngine {
    fn merge_recursive(&self, req: &MergeRequest) -> Result<()> {
        self.recursive_calls.lock().unwrap().push(req.clone());
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("merge engine failed"));
        }
        Ok(())
    }

    fn unpack_twoway(&self, req: &UnpackRequest) -> Result<()> {
        self.unpack_calls.lock().unwrap().push(req.clone());
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("unpack engine failed"));
        }
        Ok(())
    }
}

// ─── Peer layer ──────────────────────────────────────────────────────────────

pub struct MockPeerLayer {
    peers: Mutex<HashMap<String, PeerInfo>>,
    /// (peer_id, addr, port) registrations.
    pub added: Mutex<Vec<(String, String, String)>>,
}

impl MockPeerLayer {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            added: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, peer_id: &str) {
        self.peers.lock().unwrap().insert(
            peer_id.to_string(),
            PeerInfo {
                peer_id: peer_id.to_string(),
                net_state: PeerNetState::Connected,
            },
        );
    }

    /// Known to the networking layer but not reachable yet.
    pub fn set_connecting(&self, peer_id: &str) {
        self.peers.lock().unwrap().insert(
            peer_id.to_string(),
            PeerInfo {
                peer_id: peer_id.to_string(),
                net_state: PeerNetState::Connecting,
            },
        );
    }

    pub fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerLayer for MockPeerLayer {
    async fn get_peer(&self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.lock().unwrap().get(peer_id).cloned()
    }

    async fn add_peer(&self, peer_id: &str, addr: &str, port: &str) -> Result<()> {
        self.added.lock().unwrap().push((
            peer_id.to_string(),
            addr.to_string(),
            port.to_string(),
        ));
        self.set_connecting(peer_id);
        Ok(())
    }
}

// ─── Environment ─────────────────────────────────────────────────────────────

pub struct TestEnv {
    pub dir: TempDir,
    pub storage: Arc<Storage>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub manager: Arc<CloneManager>,
    pub repos: Arc<MockRepoStore>,
    pub transfer: Arc<MockTransferEngine>,
    pub indexer: Arc<MockIndexer>,
    pub checkout: Arc<MockCheckoutEngine>,
    pub merge: Arc<MockMergeEngine>,
    pub peers: Arc<MockPeerLayer>,
}

impl TestEnv {
    pub async fn new() -> Self {
        init_test_logging();
        let dir = TempDir::new().expect("temp dir");
        let repos = Arc::new(MockRepoStore::new());
        let transfer = Arc::new(MockTransferEngine::new());
        let indexer = Arc::new(MockIndexer::new(&"1".repeat(40)));
        let checkout = Arc::new(MockCheckoutEngine::new());
        let merge = Arc::new(MockMergeEngine::new());
        let peers = Arc::new(MockPeerLayer::new());
        Self::build(dir, repos, transfer, indexer, checkout, merge, peers).await
    }

    /// Fresh storage and manager over the same data dir and the same
    /// external-subsystem mocks, as after a daemon restart. The caller
    /// runs `manager.init()` to trigger rehydration.
    pub async fn restart(self) -> Self {
        let Self {
            dir,
            repos,
            transfer,
            indexer,
            checkout,
            merge,
            peers,
            ..
        } = self;
        Self::build(dir, repos, transfer, indexer, checkout, merge, peers).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn build(
        dir: TempDir,
        repos: Arc<MockRepoStore>,
        transfer: Arc<MockTransferEngine>,
        indexer: Arc<MockIndexer>,
        checkout: Arc<MockCheckoutEngine>,
        merge: Arc<MockMergeEngine>,
        peers: Arc<MockPeerLayer>,
    ) -> Self {
        let mut config = DaemonConfig::new(Some(dir.path().join("data")), "debug".to_string());
        config.connect_check_interval = Duration::from_millis(25);

        let storage = Arc::new(Storage::new(&config.data_dir).await.expect("storage init"));
        let broadcaster = Arc::new(EventBroadcaster::new());
        let deps = CloneDeps {
            repos: repos.clone(),
            transfer: transfer.clone(),
            indexer: indexer.clone(),
            checkout: checkout.clone(),
            merge: merge.clone(),
            peers: peers.clone(),
        };
        let manager = Arc::new(CloneManager::new(
            &config,
            storage.clone(),
            broadcaster.clone(),
            deps,
        ));
        manager.start();

        Self {
            dir,
            storage,
            broadcaster,
            manager,
            repos,
            transfer,
            indexer,
            checkout,
            merge,
            peers,
        }
    }

    /// Path for a would-be worktree inside the temp dir (not created).
    pub fn worktree(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    pub fn send(&self, completion: Completion) {
        self.manager
            .completion_sender()
            .send(completion)
            .expect("dispatcher alive");
    }

    /// Poll until the task reports `state`, panicking after two seconds.
    pub async fn wait_for_state(&self, repo_id: &str, state: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let current = self
                .manager
                .get_task(repo_id)
                .await
                .map(|v| v.state)
                .unwrap_or_else(|| "<no task>".to_string());
            if current == state {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("task {repo_id} never reached state {state:?}; last seen {current:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
