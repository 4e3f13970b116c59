//! Async client for the coordinator protocol.
//!
//! One `CoordinatorClient` owns one session; requests run one after another on
//! it. Errors reported by the coordinator come back as the matching
//! `ShardError` variant.

use std::path::Path;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;

use crate::error::{ShardError, ShardResult};
use crate::protocol::{expect_frame, receive_body, send_body, unexpected, write_frame, Command, Frame};

/// Result of `dispfnames`. Non-empty `warnings` mark a partial listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub names: Vec<String>,
    pub warnings: Vec<String>,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct CoordinatorClient {
    stream: TcpStream,
}

impl CoordinatorClient {
    pub async fn connect(addr: &str) -> ShardResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        Ok(Self { stream })
    }

    async fn send_command(&mut self, cmd: &Command) -> ShardResult<()> {
        write_frame(&mut self.stream, &Frame::Command(cmd.to_string())).await
    }

    /// Upload `body` as `filename` under `dest` (e.g. `~S1/folder1`).
    pub async fn upload_bytes(&mut self, filename: &str, dest: &str, body: &[u8]) -> ShardResult<String> {
        let mut src = body;
        self.upload_from(filename, dest, &mut src).await
    }

    /// Upload a local file under its own file name.
    pub async fn upload_file(&mut self, local: &Path, dest: &str) -> ShardResult<String> {
        let filename = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ShardError::malformed(format!("'{}' has no file name", local.display())))?;
        let mut file = tokio::fs::File::open(local).await.map_err(|e| ShardError::storage("opening", local, e))?;
        self.upload_from(&filename, dest, &mut file).await
    }

    async fn upload_from<S: AsyncRead + Unpin>(&mut self, filename: &str, dest: &str, src: &mut S) -> ShardResult<String> {
        self.send_command(&Command::Upload { filename: filename.to_string(), dest: dest.to_string() }).await?;
        match expect_frame(&mut self.stream).await? {
            Frame::Ready => {}
            Frame::Error(e) => return Err(e),
            other => return Err(unexpected(&other, "ready")),
        }
        send_body(src, &mut self.stream).await?;
        self.expect_status().await
    }

    pub async fn download(&mut self, filename: &str) -> ShardResult<Vec<u8>> {
        self.send_command(&Command::Download { target: filename.to_string() }).await?;
        let mut out = Vec::new();
        receive_body(&mut self.stream, &mut out).await?;
        Ok(out)
    }

    /// Download into `path`. The file only appears once the whole body
    /// arrived; a failed transfer leaves nothing behind.
    pub async fn download_to(&mut self, filename: &str, path: &Path) -> ShardResult<u64> {
        self.receive_into(&Command::Download { target: filename.to_string() }, path).await
    }

    pub async fn remove(&mut self, filename: &str) -> ShardResult<String> {
        self.send_command(&Command::Remove { filename: filename.to_string() }).await?;
        self.expect_status().await
    }

    pub async fn list(&mut self, prefix: &str) -> ShardResult<Listing> {
        self.send_command(&Command::List { prefix: prefix.to_string() }).await?;
        let mut listing = Listing::default();
        loop {
            match expect_frame(&mut self.stream).await? {
                Frame::Data(chunk) => {
                    let text = String::from_utf8_lossy(&chunk);
                    listing.names.extend(text.lines().filter(|l| !l.is_empty()).map(str::to_string));
                }
                Frame::Warning(w) => listing.warnings.push(w),
                Frame::End => return Ok(listing),
                Frame::Error(e) => return Err(e),
                other => return Err(unexpected(&other, "listing data")),
            }
        }
    }

    pub async fn archive(&mut self, extension: &str) -> ShardResult<Vec<u8>> {
        self.send_command(&Command::Archive { extension: extension.to_string() }).await?;
        let mut out = Vec::new();
        receive_body(&mut self.stream, &mut out).await?;
        Ok(out)
    }

    pub async fn archive_to(&mut self, extension: &str, path: &Path) -> ShardResult<u64> {
        self.receive_into(&Command::Archive { extension: extension.to_string() }, path).await
    }

    /// Send a raw command line and return the first reply frame. Meant for
    /// commands the client does not model itself.
    pub async fn raw(&mut self, line: &str) -> ShardResult<Frame> {
        write_frame(&mut self.stream, &Frame::Command(line.to_string())).await?;
        expect_frame(&mut self.stream).await
    }

    async fn expect_status(&mut self) -> ShardResult<String> {
        match expect_frame(&mut self.stream).await? {
            Frame::Status(s) => Ok(s),
            Frame::Error(e) => Err(e),
            other => Err(unexpected(&other, "status")),
        }
    }

    /// Send `cmd` and stream its body reply into `path`. The local file is
    /// created before the request goes out, so a local failure never leaves
    /// an unread reply on the session.
    async fn receive_into(&mut self, cmd: &Command, path: &Path) -> ShardResult<u64> {
        let part = path.with_extension(match path.extension() {
            Some(e) => format!("{}.part", e.to_string_lossy()),
            None => "part".to_string(),
        });
        let mut file = tokio::fs::File::create(&part).await.map_err(|e| ShardError::storage("creating", &part, e))?;
        let finished = match self.send_command(cmd).await {
            Ok(()) => receive_body(&mut self.stream, &mut file).await,
            Err(e) => Err(e),
        };
        drop(file);
        match finished {
            Ok(n) => {
                tokio::fs::rename(&part, path).await.map_err(|e| ShardError::storage("moving download to", path, e))?;
                Ok(n)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}
