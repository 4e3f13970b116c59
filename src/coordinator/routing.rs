//! Single-file pipelines: upload, download and delete.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{ShardError, ShardResult};
use crate::paths::{parse_destination, validate_filename, Destination};
use crate::protocol::{write_frame, Command, Frame, REMOVED_STATUS};
use crate::registry::ShardRoute;
use crate::transfer::{commit_staged, receive_upload, send_stored};

use super::CoordinatorState;

pub async fn upload<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, filename: &str, dest: &str) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_filename(filename)?;
    let route = state.registry.route_for_file(filename)?;
    let destination = parse_destination(dest)?;
    if !state.registry.knows_token(&destination.root_token) {
        return Err(ShardError::malformed(format!("unknown root '{}' in '{}'", destination.root_token, dest)));
    }
    let relative = destination.file_path(filename);

    // The body always lands in staging first so a broken upload never
    // truncates an existing file.
    let (staged, bytes) = receive_upload(socket, &state.tree, filename).await?;
    debug!(target: "routing", "conn_id={} received {} bytes for '{}'", conn_id, bytes, filename);

    if route.is_local {
        let stored = match commit_staged(&state.tree, &staged, &relative).await {
            Ok(p) => p,
            Err(e) => {
                let _ = tokio::fs::remove_file(&staged).await;
                return Err(e);
            }
        };
        state.index.put(filename, &relative);
        info!(target: "routing", "conn_id={} stored '{}' locally at {}", conn_id, filename, stored.display());
        let msg = format!("File '{}' stored at {}/{}", filename, route.root_token, relative);
        return write_frame(socket, &Frame::Status(msg)).await;
    }

    state.index.put(filename, &relative);
    match forward_upload(state, route, &staged, filename, &destination).await {
        Ok(ack) => {
            if let Err(e) = tokio::fs::remove_file(&staged).await {
                warn!(target: "routing", "conn_id={} could not remove staged copy {}: {}", conn_id, staged.display(), e);
            }
            info!(target: "routing", "conn_id={} forwarded '{}' to {} ({})", conn_id, filename, route.label(), ack);
            let msg = format!("File '{}' stored at {}/{}", filename, route.root_token, relative);
            write_frame(socket, &Frame::Status(msg)).await
        }
        Err(e) => {
            warn!(
                target: "routing",
                "conn_id={} forwarding '{}' to {} failed: {}; staged copy kept at {}",
                conn_id, filename, route.label(), e, staged.display()
            );
            Err(ShardError::from_code(
                e.code_str(),
                format!("{}; staged copy kept at {}", e.message(), staged.display()),
            ))
        }
    }
}

async fn forward_upload(
    state: &CoordinatorState,
    route: &ShardRoute,
    staged: &Path,
    filename: &str,
    destination: &Destination,
) -> ShardResult<String> {
    let mut link = state.link(route).await?;
    // Shards only look at the relative part, so rewrite the destination under
    // the shard's own root token.
    let dest = if destination.relative.is_empty() {
        route.root_token.clone()
    } else {
        format!("{}/{}", route.root_token, destination.relative)
    };
    link.request(&Command::Upload { filename: filename.to_string(), dest }).await?;
    match link.recv().await? {
        Frame::Ready => {}
        Frame::Error(e) => return Err(e),
        other => {
            return Err(ShardError::unavailable(format!(
                "{}: unexpected '{}' frame, expected ready",
                link.label(),
                other.tag() as char
            )))
        }
    }
    let mut file = tokio::fs::File::open(staged).await.map_err(|e| ShardError::storage("opening", staged, e))?;
    link.send_body(&mut file).await?;
    link.expect_status().await
}

pub async fn download<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, filename: &str) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_filename(filename)?;
    let route = state.registry.route_for_file(filename)?;
    let record = state
        .index
        .get(filename)
        .ok_or_else(|| ShardError::not_found(format!("file '{}' not found", filename)))?;

    if route.is_local {
        let n = send_stored(&state.tree, &record.relative_path, socket).await?;
        debug!(target: "routing", "conn_id={} sent {} bytes of '{}'", conn_id, n, filename);
        return Ok(());
    }

    let mut link = state.link(route).await?;
    link.request(&Command::Download { target: record.relative_path.clone() }).await?;
    let n = link.relay_body(socket).await?;
    debug!(target: "routing", "conn_id={} relayed {} bytes of '{}' from {}", conn_id, n, filename, route.label());
    Ok(())
}

pub async fn remove<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, filename: &str) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_filename(filename)?;
    let route = state.registry.route_for_file(filename)?;

    if route.is_local {
        let record = state
            .index
            .get(filename)
            .ok_or_else(|| ShardError::not_found(format!("file '{}' not found", filename)))?;
        let removed = state.tree.remove_file(&record.relative_path).await;
        // A record whose file vanished from disk is stale either way.
        if matches!(removed, Ok(()) | Err(ShardError::NotFound(_))) {
            state.index.remove(filename);
        }
        removed?;
        info!(target: "routing", "conn_id={} removed local '{}'", conn_id, record.relative_path);
        return write_frame(socket, &Frame::Status(REMOVED_STATUS.to_string())).await;
    }

    let mut link = match state.link(route).await {
        Ok(l) => l,
        Err(e) => return Err(ShardError::not_found(format!("'{}' not reachable: {}", filename, e.message()))),
    };
    link.request(&Command::Remove { filename: filename.to_string() }).await?;
    match link.expect_status().await {
        Ok(status) => {
            state.index.remove(filename);
            info!(target: "routing", "conn_id={} {} removed '{}'", conn_id, route.label(), filename);
            write_frame(socket, &Frame::Status(status)).await
        }
        Err(e @ ShardError::NotFound(_)) => {
            state.index.remove(filename);
            Err(e)
        }
        Err(e) => Err(e),
    }
}
