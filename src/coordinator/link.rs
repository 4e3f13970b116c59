//! Outbound connection from the coordinator to one shard.
//!
//! Every failure on the link itself (refused, timed out, closed mid-stream,
//! garbled frames) surfaces as `BackendUnavailable`. Error frames sent by the
//! shard are passed through with their own codes.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ShardError, ShardResult};
use crate::protocol::{read_frame, write_frame, Command, Frame, CHUNK_SIZE};
use crate::registry::ShardRoute;

pub struct ShardLink {
    stream: TcpStream,
    label: String,
    io_timeout: Duration,
}

impl ShardLink {
    pub async fn connect(route: &ShardRoute, connect_timeout: Duration, io_timeout: Duration) -> ShardResult<Self> {
        let label = route.label();
        let stream = match timeout(connect_timeout, TcpStream::connect(&route.address)).await {
            Err(_) => {
                return Err(ShardError::unavailable(format!(
                    "{}: connect timed out after {} ms",
                    label,
                    connect_timeout.as_millis()
                )))
            }
            Ok(Err(e)) => return Err(ShardError::unavailable(format!("{}: {}", label, e))),
            Ok(Ok(s)) => s,
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(target: "routing", "connected to {}", label);
        Ok(Self { stream, label, io_timeout })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn request(&mut self, cmd: &Command) -> ShardResult<()> {
        self.send(&Frame::Command(cmd.to_string())).await
    }

    pub async fn send(&mut self, frame: &Frame) -> ShardResult<()> {
        match timeout(self.io_timeout, write_frame(&mut self.stream, frame)).await {
            Err(_) => Err(self.down("write timed out")),
            Ok(Err(e)) => Err(self.down(e.message())),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Next frame from the shard. A closed connection is a failure: a shard
    /// always finishes a reply with `End`, `Status` or `Error`.
    pub async fn recv(&mut self) -> ShardResult<Frame> {
        match timeout(self.io_timeout, read_frame(&mut self.stream)).await {
            Err(_) => Err(self.down("no reply within the I/O timeout")),
            Ok(Err(e)) => Err(self.down(e.message())),
            Ok(Ok(None)) => Err(self.down("connection closed")),
            Ok(Ok(Some(f))) => Ok(f),
        }
    }

    /// Stream a local source to the shard as data frames plus `End`. A failed
    /// local read is `Storage`, not a link failure.
    pub async fn send_body<S: AsyncRead + Unpin>(&mut self, src: &mut S) -> ShardResult<u64> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = src.read(&mut buf).await.map_err(|e| ShardError::Storage(format!("reading upload body: {}", e)))?;
            if n == 0 {
                break;
            }
            self.send(&Frame::Data(buf[..n].to_vec())).await?;
            total += n as u64;
        }
        self.send(&Frame::End).await?;
        Ok(total)
    }

    /// Relay a body from the shard to the client frame by frame, without
    /// buffering it. Client write failures come back as `Io` errors.
    pub async fn relay_body<W: AsyncWrite + Unpin>(&mut self, client: &mut W) -> ShardResult<u64> {
        let mut total = 0u64;
        loop {
            match self.recv().await? {
                Frame::Data(chunk) => {
                    total += chunk.len() as u64;
                    write_frame(client, &Frame::Data(chunk)).await?;
                }
                Frame::End => {
                    write_frame(client, &Frame::End).await?;
                    return Ok(total);
                }
                Frame::Error(e) => return Err(e),
                other => return Err(self.down(&format!("unexpected '{}' frame in body", other.tag() as char))),
            }
        }
    }

    /// Wait for the final `Status` of a request.
    pub async fn expect_status(&mut self) -> ShardResult<String> {
        match self.recv().await? {
            Frame::Status(s) => Ok(s),
            Frame::Error(e) => Err(e),
            other => Err(self.down(&format!("unexpected '{}' frame, expected status", other.tag() as char))),
        }
    }

    fn down(&self, why: &str) -> ShardError {
        ShardError::unavailable(format!("{}: {}", self.label, why))
    }
}
