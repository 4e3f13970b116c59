//! In-process cluster for integration tests: a coordinator plus one shard per
//! remote extension, all on ephemeral localhost ports with temporary roots.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use shardfs::client::CoordinatorClient;
use shardfs::config::{CoordinatorConfig, RouteConfig, ShardConfig};
use shardfs::coordinator::{self, CoordinatorState};
use shardfs::shard::{self, ShardState};

pub struct Cluster {
    pub addr: String,
    pub state: CoordinatorState,
    pub root: TempDir,
    shard_roots: Vec<(String, TempDir)>,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for h in &self.handles {
            h.abort();
        }
    }
}

impl Cluster {
    /// Coordinator keeps `.c`; `.pdf`, `.txt` and `.zip` shards are started
    /// unless listed in `down`, in which case their route points at a closed port.
    pub async fn start(down: &[&str]) -> Cluster {
        let mut handles = Vec::new();
        let mut shard_roots = Vec::new();
        let mut routes = vec![RouteConfig {
            extension: ".c".into(),
            address: String::new(),
            root_token: "~S1".into(),
            local: true,
            archivable: true,
        }];
        for (ext, token, archivable) in [(".pdf", "~S2", true), (".txt", "~S3", true), (".zip", "~S4", false)] {
            let address = if down.contains(&ext) {
                closed_port_addr()
            } else {
                let dir = tempfile::tempdir().unwrap();
                let cfg = ShardConfig {
                    bind: "127.0.0.1:0".into(),
                    root: dir.path().to_path_buf(),
                    extension: ext.into(),
                    archivable,
                };
                let state = ShardState::from_config(&cfg).await.unwrap();
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap().to_string();
                handles.push(tokio::spawn(async move {
                    if let Err(e) = shard::serve(listener, state).await {
                        shardfs::tprintln!("shard task error: {e:?}");
                    }
                }));
                shard_roots.push((ext.to_string(), dir));
                addr
            };
            routes.push(RouteConfig { extension: ext.into(), address, root_token: token.into(), local: false, archivable });
        }
        Self::start_with_routes(routes, shard_roots, handles).await
    }

    /// Coordinator only, with an explicit routing table.
    pub async fn start_with_routes(
        routes: Vec<RouteConfig>,
        shard_roots: Vec<(String, TempDir)>,
        handles: Vec<JoinHandle<()>>,
    ) -> Cluster {
        Self::start_with_io_timeout(routes, shard_roots, handles, 5_000).await
    }

    /// Like `start_with_routes` with a custom shard I/O timeout.
    pub async fn start_with_io_timeout(
        routes: Vec<RouteConfig>,
        shard_roots: Vec<(String, TempDir)>,
        mut handles: Vec<JoinHandle<()>>,
        io_timeout_ms: u64,
    ) -> Cluster {
        let root = tempfile::tempdir().unwrap();
        let cfg = CoordinatorConfig {
            bind: "127.0.0.1:0".into(),
            root: root.path().to_path_buf(),
            routes,
            connect_timeout_ms: 1_000,
            io_timeout_ms,
            persist_index: true,
            index_flush_ms: 50,
        };
        let state = CoordinatorState::from_config(&cfg).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let serve_state = state.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = coordinator::serve(listener, serve_state).await {
                shardfs::tprintln!("coordinator task error: {e:?}");
            }
        }));
        Cluster { addr, state, root, shard_roots, handles }
    }

    pub async fn client(&self) -> CoordinatorClient {
        CoordinatorClient::connect(&self.addr).await.unwrap()
    }

    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    pub fn shard_root(&self, ext: &str) -> &Path {
        self.shard_roots
            .iter()
            .find(|(e, _)| e == ext)
            .map(|(_, d)| d.path())
            .unwrap_or_else(|| panic!("no running shard for {}", ext))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.state.tree.staging_dir()
    }

    pub fn staged_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.staging_dir()) {
            Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Poll `cond` every 20 ms until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while !cond() {
        assert!(std::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// An address nothing listens on.
pub fn closed_port_addr() -> String {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = l.local_addr().unwrap().to_string();
    drop(l);
    addr
}

/// Entry names of a tar blob, in archive order.
pub fn tar_entries(blob: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(blob);
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}
