//! Interactive client helpers: input parsing, command execution and output
//! rendering for the `shardfs_client` binary.

use std::path::{Path, PathBuf};

use crate::client::{CoordinatorClient, Listing};
use crate::error::{ShardError, ShardResult};
use crate::paths::normalize_extension;
use crate::protocol::{Command, Frame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    Upload { local: PathBuf, dest: String },
    Download { filename: String },
    Remove { filename: String },
    List { prefix: String },
    Archive { extension: String },
    /// Anything the client does not recognise goes to the coordinator as is,
    /// which answers with its own error.
    Raw(String),
    Help,
    Quit,
}

pub fn help_text() -> &'static str {
    "Commands:\n  \
     uploadf <local file> <~S1|~S2|~S3|~S4/path>   upload a file\n  \
     downlf <filename>                               download into the downloads directory\n  \
     removef <filename>                              delete a stored file\n  \
     dispfnames <path>                               list files under a path\n  \
     downltar <.c|.pdf|.txt>                         download an archive of one file type\n  \
     help                                            show this help\n  \
     quit | exit                                     leave the client"
}

/// Parse one input line. `Ok(None)` for blank input, `Err` with a usage
/// message for bad arguments.
pub fn parse_input(line: &str) -> Result<Option<ClientAction>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match line.to_lowercase().as_str() {
        "quit" | "exit" => return Ok(Some(ClientAction::Quit)),
        "help" => return Ok(Some(ClientAction::Help)),
        _ => {}
    }
    let action = match Command::parse(line) {
        Ok(Command::Upload { filename, dest }) => {
            if !dest.starts_with('~') {
                return Err(format!("destination '{}' must start with a root such as ~S1", dest));
            }
            ClientAction::Upload { local: PathBuf::from(filename), dest }
        }
        Ok(Command::Download { target }) => ClientAction::Download { filename: target },
        Ok(Command::Remove { filename }) => ClientAction::Remove { filename },
        Ok(Command::List { prefix }) => ClientAction::List { prefix },
        Ok(Command::Archive { extension }) => ClientAction::Archive { extension },
        Err(ShardError::UnknownCommand(_)) => ClientAction::Raw(line.to_string()),
        Err(e) => return Err(e.message().to_string()),
    };
    Ok(Some(action))
}

/// Local file name an archive of `extension` is saved under.
pub fn archive_file_name(extension: &str) -> String {
    let ext = normalize_extension(extension);
    match ext.as_str() {
        ".c" => "cfiles.tar".to_string(),
        ".pdf" => "pdf.tar".to_string(),
        ".txt" => "text.tar".to_string(),
        other => format!("{}files.tar", other.trim_start_matches('.')),
    }
}

pub fn render_listing(listing: &Listing) -> String {
    let mut out = if listing.names.is_empty() { "(no files)".to_string() } else { listing.names.join("\n") };
    for w in &listing.warnings {
        out.push_str("\nwarning: ");
        out.push_str(w);
    }
    out
}

async fn ensure_dir(dir: &Path) -> ShardResult<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| ShardError::storage("creating", dir, e))
}

/// Run an action against the coordinator and return the text to print.
/// `Help` and `Quit` are handled by the caller.
pub async fn execute(client: &mut CoordinatorClient, action: &ClientAction, downloads: &Path) -> ShardResult<String> {
    match action {
        ClientAction::Upload { local, dest } => {
            if !tokio::fs::metadata(local).await.map(|m| m.is_file()).unwrap_or(false) {
                return Err(ShardError::not_found(format!("local file '{}' not found", local.display())));
            }
            client.upload_file(local, dest).await
        }
        ClientAction::Download { filename } => {
            ensure_dir(downloads).await?;
            let target = downloads.join(filename);
            let n = client.download_to(filename, &target).await?;
            Ok(format!("Downloaded '{}' ({} bytes) to {}", filename, n, target.display()))
        }
        ClientAction::Remove { filename } => client.remove(filename).await,
        ClientAction::List { prefix } => Ok(render_listing(&client.list(prefix).await?)),
        ClientAction::Archive { extension } => {
            ensure_dir(downloads).await?;
            let target = downloads.join(archive_file_name(extension));
            let n = client.archive_to(extension, &target).await?;
            Ok(format!("Archive saved to {} ({} bytes)", target.display(), n))
        }
        ClientAction::Raw(line) => match client.raw(line).await? {
            Frame::Error(e) => Err(e),
            Frame::Status(s) | Frame::Warning(s) => Ok(s),
            other => Ok(format!("unexpected reply frame '{}'", other.tag() as char)),
        },
        ClientAction::Help => Ok(help_text().to_string()),
        ClientAction::Quit => Ok(String::new()),
    }
}
