//! Wire protocol shared by clients, the coordinator and shards.
//!
//! Every message is a frame: a one byte tag, a big-endian u32 payload length and
//! the payload. Stream ends are explicit `End` frames, so payload bytes are never
//! inspected for in-band markers.
//!
//! Tags:
//! - `C` command line (UTF-8)
//! - `K` ready to receive a body
//! - `D` data chunk
//! - `Z` end of stream
//! - `S` final status line
//! - `W` warning line (degraded aggregate result)
//! - `E` error: `code \0 message`

use std::fmt::{Display, Formatter};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ShardError, ShardResult};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// Size of data chunks produced by `send_body`.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Status line of a completed `removef`.
pub const REMOVED_STATUS: &str = "removed";

const TAG_COMMAND: u8 = b'C';
const TAG_READY: u8 = b'K';
const TAG_DATA: u8 = b'D';
const TAG_END: u8 = b'Z';
const TAG_STATUS: u8 = b'S';
const TAG_WARNING: u8 = b'W';
const TAG_ERROR: u8 = b'E';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Command(String),
    Ready,
    Data(Vec<u8>),
    End,
    Status(String),
    Warning(String),
    Error(ShardError),
}

impl Frame {
    pub fn tag(&self) -> u8 {
        match self {
            Frame::Command(_) => TAG_COMMAND,
            Frame::Ready => TAG_READY,
            Frame::Data(_) => TAG_DATA,
            Frame::End => TAG_END,
            Frame::Status(_) => TAG_STATUS,
            Frame::Warning(_) => TAG_WARNING,
            Frame::Error(_) => TAG_ERROR,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Frame::Command(s) | Frame::Status(s) | Frame::Warning(s) => s.as_bytes().to_vec(),
            Frame::Data(b) => b.clone(),
            Frame::Ready | Frame::End => Vec::new(),
            Frame::Error(e) => {
                let mut p = Vec::with_capacity(e.code_str().len() + 1 + e.message().len());
                p.extend_from_slice(e.code_str().as_bytes());
                p.push(0);
                p.extend_from_slice(e.message().as_bytes());
                p
            }
        }
    }

    fn decode(tag: u8, payload: Vec<u8>) -> ShardResult<Frame> {
        fn text(payload: Vec<u8>) -> ShardResult<String> {
            String::from_utf8(payload).map_err(|_| ShardError::protocol("frame text is not valid UTF-8"))
        }
        match tag {
            TAG_COMMAND => Ok(Frame::Command(text(payload)?)),
            TAG_READY => Ok(Frame::Ready),
            TAG_DATA => Ok(Frame::Data(payload)),
            TAG_END => Ok(Frame::End),
            TAG_STATUS => Ok(Frame::Status(text(payload)?)),
            TAG_WARNING => Ok(Frame::Warning(text(payload)?)),
            TAG_ERROR => {
                let s = text(payload)?;
                let (code, msg) = s.split_once('\0').unwrap_or(("internal", s.as_str()));
                Ok(Frame::Error(ShardError::from_code(code, msg)))
            }
            other => Err(ShardError::protocol(format!("unknown frame tag 0x{:02X}", other))),
        }
    }
}

/// Write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> ShardResult<()> {
    let payload = frame.encode_payload();
    if payload.len() > MAX_FRAME_LEN {
        return Err(ShardError::protocol(format!("frame of {} bytes exceeds limit", payload.len())));
    }
    let mut hdr = [0u8; 5];
    hdr[0] = frame.tag();
    hdr[1..].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    w.write_all(&hdr).await?;
    w.write_all(&payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` when the peer closed the connection cleanly
/// between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> ShardResult<Option<Frame>> {
    let mut tag = [0u8; 1];
    if r.read(&mut tag).await? == 0 {
        return Ok(None);
    }
    let mut len = [0u8; 4];
    r.read_exact(&mut len).await.map_err(mid_frame)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ShardError::protocol(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.map_err(mid_frame)?;
    Frame::decode(tag[0], payload).map(Some)
}

/// Read one frame, treating a closed connection as an error.
pub async fn expect_frame<R: AsyncRead + Unpin>(r: &mut R) -> ShardResult<Frame> {
    read_frame(r).await?.ok_or_else(|| ShardError::Io("peer closed the connection".into()))
}

fn mid_frame(e: std::io::Error) -> ShardError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ShardError::protocol("connection closed mid-frame")
    } else {
        e.into()
    }
}

/// Stream everything from `src` as data frames followed by `End`.
/// Returns the number of body bytes sent. A failed read of `src` is
/// `Storage`; the peer can still be answered with an `Error` frame.
pub async fn send_body<S, W>(src: &mut S, w: &mut W) -> ShardResult<u64>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await.map_err(|e| ShardError::Storage(format!("reading body: {}", e)))?;
        if n == 0 {
            break;
        }
        write_frame(w, &Frame::Data(buf[..n].to_vec())).await?;
        total += n as u64;
    }
    write_frame(w, &Frame::End).await?;
    Ok(total)
}

/// Receive data frames into `dst` until `End`. An `Error` frame from the peer
/// is returned as that error; any other frame is a protocol violation. If
/// writing to `dst` fails the body is drained and `Storage` is returned.
pub async fn receive_body<R, D>(r: &mut R, dst: &mut D) -> ShardResult<u64>
where
    R: AsyncRead + Unpin,
    D: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut sink_failed: Option<std::io::Error> = None;
    loop {
        match expect_frame(r).await? {
            Frame::Data(chunk) => {
                // After a local write failure the rest of the body is still
                // read off the socket so the next request starts on a frame.
                if sink_failed.is_none() {
                    match dst.write_all(&chunk).await {
                        Ok(()) => total += chunk.len() as u64,
                        Err(e) => sink_failed = Some(e),
                    }
                }
            }
            Frame::End => break,
            Frame::Error(e) => return Err(e),
            other => return Err(unexpected(&other, "data or end")),
        }
    }
    if sink_failed.is_none() {
        if let Err(e) = dst.flush().await {
            sink_failed = Some(e);
        }
    }
    match sink_failed {
        Some(e) => Err(ShardError::Storage(format!("writing body: {}", e))),
        None => Ok(total),
    }
}

pub fn unexpected(frame: &Frame, wanted: &str) -> ShardError {
    ShardError::protocol(format!("unexpected '{}' frame, expected {}", frame.tag() as char, wanted))
}

/// Commands understood by coordinators and shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `uploadf <filename> <destPath>`
    Upload { filename: String, dest: String },
    /// `downlf <filename>` to the coordinator; `downlf <relativePath>` to a shard.
    Download { target: String },
    /// `removef <filename>`
    Remove { filename: String },
    /// `dispfnames <pathPrefix>`
    List { prefix: String },
    /// `downltar <extension>`
    Archive { extension: String },
}

impl Command {
    pub fn parse(line: &str) -> ShardResult<Command> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| ShardError::malformed("empty command"))?;
        let args: Vec<&str> = parts.collect();
        let want = match verb {
            "uploadf" => 2,
            "downlf" | "removef" | "dispfnames" | "downltar" => 1,
            other => return Err(ShardError::UnknownCommand(format!("unknown command '{}'", other))),
        };
        if args.len() != want {
            return Err(ShardError::malformed(Self::usage(verb).unwrap_or("invalid command")));
        }
        let a0 = args[0].to_string();
        Ok(match verb {
            "uploadf" => Command::Upload { filename: a0, dest: args[1].to_string() },
            "downlf" => Command::Download { target: a0 },
            "removef" => Command::Remove { filename: a0 },
            "dispfnames" => Command::List { prefix: a0 },
            _ => Command::Archive { extension: a0 },
        })
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Upload { .. } => "uploadf",
            Command::Download { .. } => "downlf",
            Command::Remove { .. } => "removef",
            Command::List { .. } => "dispfnames",
            Command::Archive { .. } => "downltar",
        }
    }

    pub fn usage(verb: &str) -> Option<&'static str> {
        match verb {
            "uploadf" => Some("Usage: uploadf <filename> <~S1|~S2|~S3|~S4/path>"),
            "downlf" => Some("Usage: downlf <filename>"),
            "removef" => Some("Usage: removef <filename>"),
            "dispfnames" => Some("Usage: dispfnames <pathname>"),
            "downltar" => Some("Usage: downltar <.c|.pdf|.txt>"),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Upload { filename, dest } => write!(f, "uploadf {} {}", filename, dest),
            Command::Download { target } => write!(f, "downlf {}", target),
            Command::Remove { filename } => write!(f, "removef {}", filename),
            Command::List { prefix } => write!(f, "dispfnames {}", prefix),
            Command::Archive { extension } => write!(f, "downltar {}", extension),
        }
    }
}
