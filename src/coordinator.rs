//! Coordinator node: the single client-facing endpoint.
//!
//! Accepts client sessions, keeps the files of the local extension in its own
//! tree and routes everything else to the shard that owns the extension.
//! Shards are never exposed to clients.

pub mod aggregate;
pub mod link;
pub mod routing;
pub mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::CoordinatorConfig;
use crate::error::ShardResult;
use crate::index::MetadataIndex;
use crate::registry::{ShardRegistry, ShardRoute};
use crate::tree::LocalTree;

use self::link::ShardLink;

static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Shared, cheaply clonable coordinator state handed to every session.
#[derive(Clone)]
pub struct CoordinatorState {
    pub registry: Arc<ShardRegistry>,
    pub index: MetadataIndex,
    pub tree: LocalTree,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl CoordinatorState {
    /// Validate the routing table, prepare the local tree and open the index.
    pub async fn from_config(cfg: &CoordinatorConfig) -> Result<Self> {
        let registry = ShardRegistry::from_config(&cfg.routes).context("invalid routing table")?;
        let tree = LocalTree::new(&cfg.root);
        tree.ensure()
            .await
            .with_context(|| format!("preparing coordinator root {}", cfg.root.display()))?;
        let index = if cfg.persist_index {
            let path = tree.internal_dir().join("index.json");
            MetadataIndex::open(&path, cfg.index_flush_interval())
                .with_context(|| format!("loading index snapshot {}", path.display()))?
        } else {
            MetadataIndex::new()
        };
        Ok(Self {
            registry: Arc::new(registry),
            index,
            tree,
            connect_timeout: cfg.connect_timeout(),
            io_timeout: cfg.io_timeout(),
        })
    }

    /// Open a link to a remote shard using the configured timeouts.
    pub async fn link(&self, route: &ShardRoute) -> ShardResult<ShardLink> {
        ShardLink::connect(route, self.connect_timeout, self.io_timeout).await
    }
}

/// Bind the configured address and serve until the listener fails.
pub async fn run(cfg: CoordinatorConfig) -> Result<()> {
    let state = CoordinatorState::from_config(&cfg).await?;
    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding coordinator on {}", cfg.bind))?;
    let index = state.index.clone();
    let served = tokio::select! {
        r = serve(listener, state) => r,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "startup", "shutdown requested");
            Ok(())
        }
    };
    if let Err(e) = index.flush() {
        error!(target: "startup", "final index snapshot write failed: {:#}", e);
    }
    served
}

/// Accept loop. Each client session runs on its own task and never blocks
/// another one.
pub async fn serve(listener: TcpListener, state: CoordinatorState) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(
        target: "startup",
        "coordinator listening on {} root='{}' indexed={} persisted={}",
        addr,
        state.tree.root().display(),
        state.index.len(),
        state.index.snapshot_path().is_some()
    );
    for route in state.registry.routes() {
        debug!(target: "startup", "route {} -> {} archivable={}", route.extension, route.label(), route.archivable);
    }
    loop {
        let (mut socket, peer) = listener.accept().await?;
        let state = state.clone();
        let conn_id = CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let _ = socket.set_nodelay(true);
            if let Err(e) = session::handle_conn(&mut socket, &state, conn_id, &peer.to_string()).await {
                error!(target: "session", "conn_id={} peer={} error: {}", conn_id, peer, e);
            }
        });
    }
}
