//! Coordinator metadata index: filename -> relative path of the stored file.
//!
//! Keys are bare filenames, so two directories cannot hold files with the same
//! name: the later upload repoints the entry. Concurrent writers to the same key
//! are last-writer-wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub relative_path: String,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<FileRecord>,
}

#[derive(Default)]
struct Inner {
    map: RwLock<HashMap<String, FileRecord>>,
    /// Snapshot file, when persistence is enabled.
    snapshot: Option<PathBuf>,
    /// Bumped after every change to `map`.
    generation: AtomicU64,
    /// Generation the snapshot on disk reflects. Held while writing, so an
    /// older map never overwrites a newer one.
    saved: Mutex<u64>,
}

/// Cheap to clone; all clones share one map.
///
/// Updates only touch memory. With persistence enabled a background thread
/// writes the snapshot once per flush interval when something changed, and
/// the last handle to go writes it one final time.
#[derive(Clone, Default)]
pub struct MetadataIndex {
    inner: Arc<Inner>,
}

impl MetadataIndex {
    /// Purely in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index backed by a JSON snapshot at `path`; existing entries are loaded
    /// and a persister thread is started with the given interval.
    pub fn open(path: impl Into<PathBuf>, flush_interval: Duration) -> anyhow::Result<Self> {
        let path = path.into();
        let mut map = HashMap::new();
        if path.exists() {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let snap: Snapshot = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
            for rec in snap.entries {
                map.insert(rec.filename.clone(), rec);
            }
        }
        let idx = Self {
            inner: Arc::new(Inner {
                map: RwLock::new(map),
                snapshot: Some(path),
                generation: AtomicU64::new(0),
                saved: Mutex::new(0),
            }),
        };
        idx.ensure_persistence_loop(flush_interval)?;
        Ok(idx)
    }

    fn ensure_persistence_loop(&self, interval: Duration) -> anyhow::Result<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        std::thread::Builder::new()
            .name("index-persist".into())
            .spawn(move || loop {
                std::thread::sleep(interval);
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = inner.flush() {
                    warn!(target: "index", "index snapshot write failed: {:#}", e);
                }
            })
            .context("starting index persister")?;
        Ok(())
    }

    pub fn put(&self, filename: &str, relative_path: &str) {
        let rec = FileRecord { filename: filename.to_string(), relative_path: relative_path.to_string() };
        self.inner.map.write().insert(filename.to_string(), rec);
        self.inner.generation.fetch_add(1, Ordering::Release);
    }

    pub fn get(&self, filename: &str) -> Option<FileRecord> {
        self.inner.map.read().get(filename).cloned()
    }

    /// Evict an entry; returns the removed record.
    pub fn remove(&self, filename: &str) -> Option<FileRecord> {
        let out = self.inner.map.write().remove(filename);
        if out.is_some() {
            self.inner.generation.fetch_add(1, Ordering::Release);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.read().is_empty()
    }

    /// All records sorted by filename.
    pub fn records(&self) -> Vec<FileRecord> {
        self.inner.records()
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.inner.snapshot.as_deref()
    }

    /// Write the snapshot now if anything changed since the last write.
    /// Returns whether a write happened.
    pub fn flush(&self) -> anyhow::Result<bool> {
        self.inner.flush()
    }
}

impl Inner {
    fn records(&self) -> Vec<FileRecord> {
        let mut v: Vec<FileRecord> = self.map.read().values().cloned().collect();
        v.sort_by(|a, b| a.filename.cmp(&b.filename));
        v
    }

    fn flush(&self) -> anyhow::Result<bool> {
        let Some(path) = &self.snapshot else { return Ok(false) };
        let mut saved = self.saved.lock();
        // Read the generation before copying the map: a change racing with
        // the copy leaves the generation ahead and is written next time.
        let current = self.generation.load(Ordering::Acquire);
        if *saved == current {
            return Ok(false);
        }
        let snap = Snapshot { version: 1, entries: self.records() };
        let bytes = serde_json::to_vec_pretty(&snap)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        *saved = current;
        debug!(target: "index", "index snapshot written: {} entries, generation {}", snap.entries.len(), current);
        Ok(true)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(target: "index", "final index snapshot write failed: {:#}", e);
        }
    }
}
