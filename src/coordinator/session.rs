//! One client session: a loop of commands on a single connection.
//!
//! A failed request is answered with an `Error` frame and the session keeps
//! reading commands. Only I/O and framing failures end the session.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{ShardError, ShardResult};
use crate::protocol::{read_frame, unexpected, write_frame, Command, Frame};

use super::{aggregate, routing, CoordinatorState};

pub async fn handle_conn<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, peer: &str) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(target: "session", "conn_id={} session opened from {}", conn_id, peer);
    loop {
        let Some(frame) = read_frame(socket).await? else {
            debug!(target: "session", "conn_id={} client disconnected", conn_id);
            return Ok(());
        };
        let line = match frame {
            Frame::Command(line) => line,
            other => {
                let err = ShardError::malformed(unexpected(&other, "a command").message());
                warn!(target: "session", "conn_id={} {}", conn_id, err);
                write_frame(socket, &Frame::Error(err)).await?;
                continue;
            }
        };
        let outcome = match Command::parse(&line) {
            Ok(cmd) => {
                info!(target: "session", "conn_id={} {}", conn_id, cmd);
                dispatch(socket, state, conn_id, cmd).await
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_request_scoped() => {
                warn!(target: "session", "conn_id={} request '{}' failed: {}", conn_id, line.trim(), e);
                write_frame(socket, &Frame::Error(e)).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn dispatch<S>(socket: &mut S, state: &CoordinatorState, conn_id: u64, cmd: Command) -> ShardResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match cmd {
        Command::Upload { filename, dest } => routing::upload(socket, state, conn_id, &filename, &dest).await,
        Command::Download { target } => routing::download(socket, state, conn_id, &target).await,
        Command::Remove { filename } => routing::remove(socket, state, conn_id, &filename).await,
        Command::List { prefix } => aggregate::list(socket, state, conn_id, &prefix).await,
        Command::Archive { extension } => aggregate::archive(socket, state, conn_id, &extension).await,
    }
}
