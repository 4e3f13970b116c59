//! Unified error model for coordinator, shards and clients.
//! Every variant carries a stable wire code so an error raised on a shard can be
//! relayed through the coordinator and rebuilt unchanged on the client.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("unsupported_type: {0}")]
    UnsupportedType(String),
    #[error("backend_unavailable: {0}")]
    BackendUnavailable(String),
    #[error("archive_build_failed: {0}")]
    ArchiveBuildFailed(String),
    #[error("malformed_command: {0}")]
    MalformedCommand(String),
    #[error("unknown_command: {0}")]
    UnknownCommand(String),
    /// Local disk failure while serving a request. The socket is still usable.
    #[error("storage: {0}")]
    Storage(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ShardError {
    pub fn code_str(&self) -> &'static str {
        match self {
            ShardError::NotFound(_) => "not_found",
            ShardError::UnsupportedType(_) => "unsupported_type",
            ShardError::BackendUnavailable(_) => "backend_unavailable",
            ShardError::ArchiveBuildFailed(_) => "archive_build_failed",
            ShardError::MalformedCommand(_) => "malformed_command",
            ShardError::UnknownCommand(_) => "unknown_command",
            ShardError::Storage(_) => "storage",
            ShardError::Protocol(_) => "protocol",
            ShardError::Io(_) => "io",
            ShardError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ShardError::NotFound(m)
            | ShardError::UnsupportedType(m)
            | ShardError::BackendUnavailable(m)
            | ShardError::ArchiveBuildFailed(m)
            | ShardError::MalformedCommand(m)
            | ShardError::UnknownCommand(m)
            | ShardError::Storage(m)
            | ShardError::Protocol(m)
            | ShardError::Io(m)
            | ShardError::Internal(m) => m.as_str(),
        }
    }

    /// Rebuild an error from its wire code. Unknown codes become `Internal` so a
    /// newer peer never makes an older one fail to decode.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let m = message.into();
        match code {
            "not_found" => ShardError::NotFound(m),
            "unsupported_type" => ShardError::UnsupportedType(m),
            "backend_unavailable" => ShardError::BackendUnavailable(m),
            "archive_build_failed" => ShardError::ArchiveBuildFailed(m),
            "malformed_command" => ShardError::MalformedCommand(m),
            "unknown_command" => ShardError::UnknownCommand(m),
            "storage" => ShardError::Storage(m),
            "protocol" => ShardError::Protocol(m),
            "io" => ShardError::Io(m),
            _ => ShardError::Internal(m),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self { ShardError::NotFound(msg.into()) }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self { ShardError::UnsupportedType(msg.into()) }
    pub fn unavailable<S: Into<String>>(msg: S) -> Self { ShardError::BackendUnavailable(msg.into()) }
    pub fn archive<S: Into<String>>(msg: S) -> Self { ShardError::ArchiveBuildFailed(msg.into()) }
    pub fn malformed<S: Into<String>>(msg: S) -> Self { ShardError::MalformedCommand(msg.into()) }
    pub fn protocol<S: Into<String>>(msg: S) -> Self { ShardError::Protocol(msg.into()) }

    /// Wrap a filesystem error with what was being done and to which path.
    pub fn storage(what: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        ShardError::Storage(format!("{} {}: {}", what, path.display(), err))
    }

    /// Errors that only concern the current request. `Io` and `Protocol` mean
    /// the socket itself is unusable; disk failures are `Storage`, never `Io`.
    pub fn is_request_scoped(&self) -> bool {
        !matches!(self, ShardError::Io(_) | ShardError::Protocol(_))
    }
}

/// Socket errors. Filesystem errors go through `ShardError::storage` instead.
impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        ShardError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for ShardError {
    fn from(err: anyhow::Error) -> Self {
        // Typed errors pass through; anything else is internal.
        match err.downcast::<ShardError>() {
            Ok(e) => e,
            Err(other) => ShardError::Internal(other.to_string()),
        }
    }
}

pub type ShardResult<T> = Result<T, ShardError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
