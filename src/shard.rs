//! Shard backend: stores the files of exactly one extension.
//!
//! Shards answer one request per connection and only ever talk to the
//! coordinator. Destination root tokens are stripped; the remainder is a path
//! relative to the shard's own root.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ShardConfig;
use crate::error::{ShardError, ShardResult};
use crate::paths::{extension_of, normalize_extension, normalize_prefix, parse_destination, validate_filename};
use crate::protocol::{read_frame, unexpected, write_frame, Command, Frame, REMOVED_STATUS};
use crate::transfer::{commit_staged, receive_upload, send_archive, send_stored};
use crate::tree::LocalTree;

static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct ShardState {
    pub extension: String,
    pub archivable: bool,
    pub tree: LocalTree,
}

impl ShardState {
    pub async fn from_config(cfg: &ShardConfig) -> Result<Self> {
        let tree = LocalTree::new(&cfg.root);
        tree.ensure()
            .await
            .with_context(|| format!("preparing shard root {}", cfg.root.display()))?;
        Ok(Self { extension: normalize_extension(&cfg.extension), archivable: cfg.archivable, tree })
    }

    fn check_owned(&self, filename: &str) -> ShardResult<()> {
        if extension_of(filename) == Some(self.extension.as_str()) {
            Ok(())
        } else {
            Err(ShardError::unsupported(format!("this shard only stores {} files", self.extension)))
        }
    }
}

pub async fn run(cfg: ShardConfig) -> Result<()> {
    let state = ShardState::from_config(&cfg).await?;
    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {} shard on {}", state.extension, cfg.bind))?;
    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: ShardState) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(
        target: "startup",
        "{} shard listening on {} root='{}' archivable={}",
        state.extension,
        addr,
        state.tree.root().display(),
        state.archivable
    );
    loop {
        let (mut socket, peer) = listener.accept().await?;
        let state = state.clone();
        let conn_id = CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let _ = socket.set_nodelay(true);
            if let Err(e) = handle_request(&mut socket, &state, conn_id).await {
                error!(target: "shard", "conn_id={} peer={} error: {}", conn_id, peer, e);
            }
        });
    }
}

/// Serve the single request of a connection.
pub async fn handle_request<S>(socket: &mut S, state: &ShardState, conn_id: u64) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = match read_frame(socket).await? {
        None => return Ok(()),
        Some(Frame::Command(line)) => line,
        Some(other) => return Err(unexpected(&other, "a command")),
    };
    let outcome = match Command::parse(&line) {
        Ok(cmd) => {
            debug!(target: "shard", "conn_id={} {} {}", conn_id, state.extension, cmd);
            dispatch(socket, state, conn_id, cmd).await
        }
        Err(e) => Err(e),
    };
    match outcome {
        Err(e) if e.is_request_scoped() => {
            warn!(target: "shard", "conn_id={} '{}' failed: {}", conn_id, line.trim(), e);
            write_frame(socket, &Frame::Error(e)).await
        }
        other => other,
    }
}

async fn dispatch<S>(socket: &mut S, state: &ShardState, conn_id: u64, cmd: Command) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match cmd {
        Command::Upload { filename, dest } => {
            validate_filename(&filename)?;
            state.check_owned(&filename)?;
            let relative = parse_destination(&dest)?.file_path(&filename);
            let (staged, bytes) = receive_upload(socket, &state.tree, &filename).await?;
            if let Err(e) = commit_staged(&state.tree, &staged, &relative).await {
                let _ = tokio::fs::remove_file(&staged).await;
                return Err(e);
            }
            info!(target: "shard", "conn_id={} stored {} ({} bytes)", conn_id, relative, bytes);
            write_frame(socket, &Frame::Status(format!("stored {}", relative))).await
        }
        Command::Download { target } => {
            let n = send_stored(&state.tree, &target, socket).await?;
            debug!(target: "shard", "conn_id={} sent {} ({} bytes)", conn_id, target, n);
            Ok(())
        }
        Command::Remove { filename } => {
            validate_filename(&filename)?;
            let found = match state.check_owned(&filename) {
                Ok(()) => state.tree.find_by_name(&filename).await?,
                Err(_) => None,
            };
            let relative = found.ok_or_else(|| ShardError::not_found(format!("file '{}' not found", filename)))?;
            state.tree.remove_file(&relative).await?;
            info!(target: "shard", "conn_id={} removed {}", conn_id, relative);
            write_frame(socket, &Frame::Status(REMOVED_STATUS.to_string())).await
        }
        Command::List { prefix } => {
            let relative = normalize_prefix(&prefix)?;
            let names = state.tree.list_names(&relative, &state.extension).await?;
            for name in &names {
                write_frame(socket, &Frame::Data(format!("{}\n", name).into_bytes())).await?;
            }
            write_frame(socket, &Frame::End).await
        }
        Command::Archive { extension } => {
            let ext = normalize_extension(&extension);
            if ext != state.extension {
                return Err(ShardError::unsupported(format!("this shard only archives {} files", state.extension)));
            }
            if !state.archivable {
                return Err(ShardError::unsupported(format!("archives are not offered for {} files", ext)));
            }
            let entries = send_archive(&state.tree, &ext, socket).await?;
            info!(target: "shard", "conn_id={} sent {} archive with {} entries", conn_id, ext, entries);
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "shard/shard_tests.rs"]
mod shard_tests;
