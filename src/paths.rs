//! Namespace path convention helpers.
//!
//! Client destinations look like `~S2/folder1/sub`: a fixed-width logical root
//! token naming a shard's namespace, then an optional relative subpath. The
//! coordinator and shards only ever touch disk through the relative part.

use crate::error::{ShardError, ShardResult};

/// Width of the logical root token (`~S1`, `~S2`, ...).
pub const ROOT_TOKEN_WIDTH: usize = 3;

/// A parsed destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub root_token: String,
    /// Relative subpath below the root; empty for the root itself.
    pub relative: String,
}

impl Destination {
    /// Relative path of `filename` placed under this destination.
    pub fn file_path(&self, filename: &str) -> String {
        join_relative(&self.relative, filename)
    }
}

/// Return true when `token` has the shape of a root token.
pub fn is_root_token(token: &str) -> bool {
    token.len() == ROOT_TOKEN_WIDTH && token.starts_with('~') && token.is_ascii()
}

/// Split a client destination into root token and validated relative subpath.
pub fn parse_destination(dest: &str) -> ShardResult<Destination> {
    if dest.len() < ROOT_TOKEN_WIDTH || !dest.is_char_boundary(ROOT_TOKEN_WIDTH) {
        return Err(ShardError::malformed(format!("destination '{}' lacks a root token like ~S1", dest)));
    }
    let (token, rest) = dest.split_at(ROOT_TOKEN_WIDTH);
    if !is_root_token(token) {
        return Err(ShardError::malformed(format!("destination '{}' lacks a root token like ~S1", dest)));
    }
    let relative = if rest.is_empty() {
        String::new()
    } else if let Some(r) = rest.strip_prefix('/') {
        r.trim_end_matches('/').to_string()
    } else {
        return Err(ShardError::malformed(format!("destination '{}' must separate the root token with '/'", dest)));
    };
    validate_relative_path(&relative)?;
    Ok(Destination { root_token: token.to_string(), relative })
}

/// Normalize a listing prefix. Accepts either a bare relative path or one that
/// starts with a root token, which is dropped.
pub fn normalize_prefix(prefix: &str) -> ShardResult<String> {
    if prefix.starts_with('~') {
        return Ok(parse_destination(prefix)?.relative);
    }
    let p = prefix.trim_matches('/');
    let p = if p == "." { "" } else { p };
    validate_relative_path(p)?;
    Ok(p.to_string())
}

/// Validate a relative path:
/// - segments separated by '/'
/// - NUL not allowed
/// - no leading '/', no empty segments, no '.' or '..' segments
/// The empty string denotes the root and is valid.
pub fn validate_relative_path(path: &str) -> ShardResult<()> {
    if path.is_empty() {
        return Ok(());
    }
    if path.contains('\u{0000}') {
        return Err(ShardError::malformed("path cannot contain NUL characters"));
    }
    if path.starts_with('/') {
        return Err(ShardError::malformed(format!("path '{}' must be relative", path)));
    }
    for seg in path.split('/') {
        if seg.is_empty() {
            return Err(ShardError::malformed(format!("empty segment in path '{}'", path)));
        }
        if seg == "." || seg == ".." {
            return Err(ShardError::malformed(format!("segments '.' and '..' are not allowed in '{}'", path)));
        }
    }
    Ok(())
}

/// Validate a bare filename (the index key).
pub fn validate_filename(name: &str) -> ShardResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(ShardError::malformed(format!("invalid filename '{}'", name)));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\u{0000}') {
        return Err(ShardError::malformed(format!("filename '{}' must not contain path separators", name)));
    }
    Ok(())
}

/// Extension of a filename including the leading dot, e.g. `.pdf`.
/// Hidden files without a further dot (`.bashrc`) have no extension.
pub fn extension_of(filename: &str) -> Option<&str> {
    let idx = filename.rfind('.')?;
    if idx == 0 || idx + 1 == filename.len() {
        return None;
    }
    Some(&filename[idx..])
}

/// Accept `pdf` or `.pdf` and return `.pdf`.
pub fn normalize_extension(ext: &str) -> String {
    if ext.starts_with('.') { ext.to_string() } else { format!(".{}", ext) }
}

/// Join a relative directory and a name with '/'.
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() { name.to_string() } else { format!("{}/{}", dir, name) }
}
