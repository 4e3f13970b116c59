//! Aggregation across all nodes: namespace listing and per-type archives.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{ShardError, ShardResult};
use crate::paths::{normalize_extension, normalize_prefix};
use crate::protocol::{write_frame, Command, Frame};
use crate::registry::ShardRoute;
use crate::transfer::send_archive;

use super::CoordinatorState;

/// `dispfnames`: local names first, then every remote shard in registry
/// order. Each contribution is sorted on its own. Unreachable shards and an
/// unreadable local tree become warning frames after the names.
pub async fn list<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, prefix: &str) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let relative = normalize_prefix(prefix)?;
    let local = state.registry.local();
    let mut total = 0usize;
    let mut warnings = Vec::new();

    // An unreadable local tree is reported like an unreachable shard.
    match state.tree.list_names(&relative, &local.extension).await {
        Ok(names) => {
            for name in names {
                write_frame(socket, &Frame::Data(format!("{}\n", name).into_bytes())).await?;
                total += 1;
            }
        }
        Err(e @ ShardError::Storage(_)) => {
            warn!(target: "aggregate", "conn_id={} local listing failed: {}", conn_id, e);
            warnings.push(format!("{} files unavailable: {}", local.extension, e.message()));
        }
        Err(e) => return Err(e),
    }

    for route in state.registry.remote() {
        match fetch_listing(state, route, &relative).await {
            Ok(names) => {
                debug!(target: "aggregate", "conn_id={} {} listed {} names", conn_id, route.label(), names.len());
                for name in names {
                    write_frame(socket, &Frame::Data(format!("{}\n", name).into_bytes())).await?;
                    total += 1;
                }
            }
            Err(e) => {
                warn!(target: "aggregate", "conn_id={} listing from {} failed: {}", conn_id, route.label(), e);
                warnings.push(format!("{} files unavailable: {}", route.extension, e.message()));
            }
        }
    }

    for w in warnings {
        write_frame(socket, &Frame::Warning(w)).await?;
    }
    write_frame(socket, &Frame::End).await?;
    info!(target: "aggregate", "conn_id={} listed {} names under '{}'", conn_id, total, relative);
    Ok(())
}

/// A shard's complete listing. Partial results are dropped when the shard
/// fails halfway.
async fn fetch_listing(state: &CoordinatorState, route: &ShardRoute, relative: &str) -> ShardResult<Vec<String>> {
    let mut link = state.link(route).await?;
    let prefix = if relative.is_empty() { ".".to_string() } else { relative.to_string() };
    link.request(&Command::List { prefix }).await?;
    let mut names = Vec::new();
    loop {
        match link.recv().await? {
            Frame::Data(chunk) => {
                let text = String::from_utf8_lossy(&chunk);
                names.extend(text.lines().filter(|l| !l.is_empty()).map(str::to_string));
            }
            Frame::Warning(w) => debug!(target: "aggregate", "{} warned: {}", route.label(), w),
            Frame::End => return Ok(names),
            Frame::Error(e) => return Err(e),
            other => {
                return Err(ShardError::unavailable(format!(
                    "{}: unexpected '{}' frame in listing",
                    link.label(),
                    other.tag() as char
                )))
            }
        }
    }
}

/// `downltar`: build the archive locally or relay it from the owning shard.
pub async fn archive<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, extension: &str) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ext = normalize_extension(extension);
    let route = state
        .registry
        .route_for(&ext)
        .ok_or_else(|| ShardError::unsupported(format!("no shard handles {} files", ext)))?;
    if !route.archivable {
        return Err(ShardError::unsupported(format!("archives are not offered for {} files", ext)));
    }

    if route.is_local {
        let entries = send_archive(&state.tree, &ext, socket).await?;
        info!(target: "aggregate", "conn_id={} sent local {} archive with {} entries", conn_id, ext, entries);
        return Ok(());
    }

    let mut link = state.link(route).await?;
    link.request(&Command::Archive { extension: ext.clone() }).await?;
    let n = link.relay_body(socket).await?;
    info!(target: "aggregate", "conn_id={} relayed {} archive from {} ({} bytes)", conn_id, ext, route.label(), n);
    Ok(())
}
