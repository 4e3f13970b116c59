//! Body transfers between sockets and a node's local tree.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{ShardError, ShardResult};
use crate::protocol::{receive_body, send_body, write_frame, Frame};
use crate::tree::LocalTree;

/// Answer `Ready`, then receive an upload body into a fresh staging file.
/// The staging file is removed again if the body does not arrive intact.
pub async fn receive_upload<S>(socket: &mut S, tree: &LocalTree, filename: &str) -> ShardResult<(PathBuf, u64)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (staged, mut file) = tree.create_staged(filename).await?;
    let received = async {
        write_frame(socket, &Frame::Ready).await?;
        let n = receive_body(socket, &mut file).await?;
        file.flush().await.map_err(|e| ShardError::storage("writing", &staged, e))?;
        file.sync_data().await.map_err(|e| ShardError::storage("syncing", &staged, e))?;
        Ok::<u64, ShardError>(n)
    }
    .await;
    drop(file);
    match received {
        Ok(n) => Ok((staged, n)),
        Err(e) => {
            let _ = tokio::fs::remove_file(&staged).await;
            Err(e)
        }
    }
}

/// Move a completed staging file to its final relative path.
pub async fn commit_staged(tree: &LocalTree, staged: &Path, relative: &str) -> ShardResult<PathBuf> {
    let target = tree.resolve(relative)?;
    if let Some(dir) = target.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| ShardError::storage("creating", dir, e))?;
    }
    tokio::fs::rename(staged, &target).await.map_err(|e| ShardError::storage("moving upload to", &target, e))?;
    Ok(target)
}

/// Stream a stored file as data frames plus `End`.
pub async fn send_stored<W>(tree: &LocalTree, relative: &str, socket: &mut W) -> ShardResult<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut file = tree.open_file(relative).await?;
    send_body(&mut file, socket).await
}

/// Build an archive of `extension` files, stream it and remove the artifact,
/// whether or not streaming succeeded.
pub async fn send_archive<W>(tree: &LocalTree, extension: &str, socket: &mut W) -> ShardResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let artifact = tree.build_archive(extension).await?;
    let sent = match tokio::fs::File::open(&artifact.path).await {
        Ok(mut f) => send_body(&mut f, socket).await,
        Err(e) => Err(ShardError::archive(format!("reopening archive: {}", e))),
    };
    let entries = artifact.entries;
    artifact.discard().await;
    sent.map(|_| entries)
}
