//! Local storage tree owned by one node (the coordinator or a shard).
//!
//! Everything is addressed by validated relative paths below `root`. Node
//! bookkeeping (staging copies, archive artifacts, index snapshot) lives in
//! `root/.shardfs` and is never listed, archived or matched by name lookups.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use walkdir::WalkDir;

use crate::error::{ShardError, ShardResult};
use crate::paths::{extension_of, validate_filename, validate_relative_path};

pub const INTERNAL_DIR: &str = ".shardfs";

#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

/// A finished archive on disk. Call `discard` once it has been streamed.
#[derive(Debug)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub entries: usize,
}

impl ArchiveArtifact {
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(target: "tree", "failed to remove archive artifact {}: {}", self.path.display(), e);
        }
    }
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.root.join(INTERNAL_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.internal_dir().join("staging")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.internal_dir().join("tmp")
    }

    /// Create the root and bookkeeping directories.
    pub async fn ensure(&self) -> ShardResult<()> {
        for dir in [self.staging_dir(), self.tmp_dir()] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| ShardError::storage("creating", &dir, e))?;
        }
        Ok(())
    }

    /// Absolute path for a validated relative path.
    pub fn resolve(&self, relative: &str) -> ShardResult<PathBuf> {
        validate_relative_path(relative)?;
        if relative.split('/').next() == Some(INTERNAL_DIR) {
            return Err(ShardError::malformed(format!("'{}' is reserved", INTERNAL_DIR)));
        }
        Ok(if relative.is_empty() { self.root.clone() } else { self.root.join(relative) })
    }

    /// Create (truncate) a file at `relative`, creating parent directories.
    pub async fn create_file(&self, relative: &str) -> ShardResult<(PathBuf, File)> {
        let path = self.resolve(relative)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| ShardError::storage("creating", dir, e))?;
        }
        let f = File::create(&path).await.map_err(|e| ShardError::storage("creating", &path, e))?;
        Ok((path, f))
    }

    /// Create a uniquely named staging file for `filename`.
    pub async fn create_staged(&self, filename: &str) -> ShardResult<(PathBuf, File)> {
        validate_filename(filename)?;
        let dir = self.staging_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| ShardError::storage("creating", &dir, e))?;
        let path = dir.join(format!("{}-{}", uuid::Uuid::new_v4(), filename));
        let f = File::create(&path).await.map_err(|e| ShardError::storage("creating", &path, e))?;
        Ok((path, f))
    }

    pub async fn open_file(&self, relative: &str) -> ShardResult<File> {
        let path = self.resolve(relative)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => File::open(&path).await.map_err(|e| ShardError::storage("opening", &path, e)),
            Ok(_) => Err(ShardError::not_found(format!("'{}' is not a file", relative))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ShardError::not_found(format!("file '{}' not found", relative)))
            }
            Err(e) => Err(ShardError::storage("inspecting", &path, e)),
        }
    }

    pub async fn remove_file(&self, relative: &str) -> ShardResult<()> {
        let path = self.resolve(relative)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ShardError::not_found(format!("file '{}' not found", relative)))
            }
            Err(e) => Err(ShardError::storage("removing", &path, e)),
        }
    }

    /// First file named `filename` anywhere in the tree, in sorted walk order.
    /// Returns its relative path.
    pub async fn find_by_name(&self, filename: &str) -> ShardResult<Option<String>> {
        validate_filename(filename)?;
        let root = self.root.clone();
        let name = filename.to_string();
        run_blocking(move || {
            Ok(walk_files(&root, &root)?
                .into_iter()
                .find(|(_, rel)| rel.rsplit('/').next() == Some(name.as_str()))
                .map(|(_, rel)| rel))
        })
        .await
    }

    /// Sorted filenames (last component only) of every `extension` file under
    /// `prefix`, recursively. A missing prefix directory yields an empty list.
    pub async fn list_names(&self, prefix: &str, extension: &str) -> ShardResult<Vec<String>> {
        let base = self.resolve(prefix)?;
        let root = self.root.clone();
        let ext = extension.to_string();
        run_blocking(move || {
            let mut names: Vec<String> = walk_files(&root, &base)?
                .into_iter()
                .filter_map(|(_, rel)| {
                    let name = rel.rsplit('/').next()?.to_string();
                    (extension_of(&name) == Some(ext.as_str())).then_some(name)
                })
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }

    /// Pack every `extension` file of the tree into a tar artifact under the
    /// tmp directory. Entries carry relative names and are added in sorted order.
    pub async fn build_archive(&self, extension: &str) -> ShardResult<ArchiveArtifact> {
        let root = self.root.clone();
        let ext = extension.to_string();
        let out = self.tmp_dir().join(format!("{}.tar", uuid::Uuid::new_v4()));
        let out_path = out.clone();
        let built = run_blocking(move || {
            std::fs::create_dir_all(out.parent().unwrap_or(&root))
                .map_err(|e| ShardError::archive(format!("creating tmp dir: {}", e)))?;
            let file = std::fs::File::create(&out)
                .map_err(|e| ShardError::archive(format!("creating {}: {}", out.display(), e)))?;
            let mut builder = tar::Builder::new(file);
            let files = walk_files(&root, &root).map_err(|e| ShardError::archive(e.message().to_string()))?;
            let mut entries = 0usize;
            for (abs, rel) in files {
                let name = rel.rsplit('/').next().unwrap_or(rel.as_str());
                if extension_of(name) != Some(ext.as_str()) {
                    continue;
                }
                builder
                    .append_path_with_name(&abs, &rel)
                    .map_err(|e| ShardError::archive(format!("adding {}: {}", rel, e)))?;
                entries += 1;
            }
            builder
                .into_inner()
                .and_then(|f| f.sync_all())
                .map_err(|e| ShardError::archive(format!("finishing archive: {}", e)))?;
            Ok(entries)
        })
        .await;
        match built {
            Ok(entries) => Ok(ArchiveArtifact { path: out_path, entries }),
            Err(e) => {
                let _ = tokio::fs::remove_file(&out_path).await;
                Err(e)
            }
        }
    }
}

/// Regular files below `base` as (absolute, root-relative '/'-joined) pairs,
/// sorted by path, skipping the bookkeeping directory.
///
/// A missing `base` is an empty tree, and so is an entry that vanished while
/// walking. Any other walk failure (permissions, unreadable directories) is
/// returned instead of shortening the result.
fn walk_files(root: &Path, base: &Path) -> ShardResult<Vec<(PathBuf, String)>> {
    let internal = root.join(INTERNAL_DIR);
    let mut out: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(base).sort_by_file_name().into_iter().filter_entry(|e| e.path() != internal) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                tracing::debug!(target: "tree", "skipping vanished entry under {}: {}", base.display(), e);
                continue;
            }
            Err(e) => {
                let at = e.path().unwrap_or(base).to_path_buf();
                let io = e.into_io_error().unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
                return Err(ShardError::storage("walking", &at, io));
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else { continue };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push((entry.path().to_path_buf(), rel));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

async fn run_blocking<T, F>(f: F) -> ShardResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ShardResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ShardError::Internal(format!("blocking task failed: {}", e)))?
}
