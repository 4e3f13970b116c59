//! Node configuration.
//!
//! Precedence, lowest first: built-in defaults (the four-node topology), an
//! optional JSON file, environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths::normalize_extension;

pub const DEFAULT_COORDINATOR_BIND: &str = "0.0.0.0:6500";

/// One entry of the routing table as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub extension: String,
    /// `host:port` of the shard. Ignored for the local route.
    pub address: String,
    /// Logical root token clients use for this namespace, e.g. `~S2`.
    pub root_token: String,
    /// Stored by the coordinator itself instead of being forwarded.
    #[serde(default)]
    pub local: bool,
    /// Whether `downltar` is offered for this extension.
    #[serde(default = "default_true")]
    pub archivable: bool,
}

fn default_true() -> bool { true }

/// The four-node deployment: `.c` kept on the coordinator, `.pdf`, `.txt` and
/// `.zip` on three shards. Zip archives are not offered.
pub fn default_routes() -> Vec<RouteConfig> {
    let r = |ext: &str, port: u16, token: &str, local: bool, archivable: bool| RouteConfig {
        extension: ext.to_string(),
        address: format!("127.0.0.1:{}", port),
        root_token: token.to_string(),
        local,
        archivable,
    };
    vec![
        r(".c", 6500, "~S1", true, true),
        r(".pdf", 6501, "~S2", false, true),
        r(".txt", 6502, "~S3", false, true),
        r(".zip", 6503, "~S4", false, false),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    pub bind: String,
    pub root: PathBuf,
    pub routes: Vec<RouteConfig>,
    #[serde(default = "CoordinatorConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "CoordinatorConfig::default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Keep a JSON snapshot of the metadata index under the root.
    #[serde(default = "default_true")]
    pub persist_index: bool,
    /// How often the background persister writes a changed index snapshot.
    #[serde(default = "CoordinatorConfig::default_index_flush_ms")]
    pub index_flush_ms: u64,
}

impl CoordinatorConfig {
    fn default_connect_timeout_ms() -> u64 { 3_000 }
    fn default_io_timeout_ms() -> u64 { 30_000 }
    fn default_index_flush_ms() -> u64 { 1_000 }

    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn io_timeout(&self) -> Duration { Duration::from_millis(self.io_timeout_ms) }
    pub fn index_flush_interval(&self) -> Duration { Duration::from_millis(self.index_flush_ms.max(1)) }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading coordinator config {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing coordinator config {}", path.display()))
    }

    /// Environment overrides. A variable that is set but does not parse is an
    /// error, never a silent fallback to the default.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("SHARDFS_BIND") { self.bind = v; }
        if let Ok(v) = std::env::var("SHARDFS_ROOT") { self.root = PathBuf::from(v); }
        if let Some(v) = parse_u64_env("SHARDFS_CONNECT_TIMEOUT_MS")? { self.connect_timeout_ms = v; }
        if let Some(v) = parse_u64_env("SHARDFS_IO_TIMEOUT_MS")? { self.io_timeout_ms = v; }
        if let Some(v) = parse_u64_env("SHARDFS_INDEX_FLUSH_MS")? { self.index_flush_ms = v; }
        if let Ok(v) = std::env::var("SHARDFS_PERSIST_INDEX") {
            self.persist_index = parse_bool(&v).with_context(|| format!("SHARDFS_PERSIST_INDEX='{}'", v))?;
        }
        Ok(())
    }

    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        if let Some(v) = arg_value(args, "--bind") { self.bind = v; }
        if let Some(v) = arg_value(args, "--root") { self.root = PathBuf::from(v); }
        if let Some(v) = parse_u64_arg(args, "--connect-timeout-ms")? { self.connect_timeout_ms = v; }
        if let Some(v) = parse_u64_arg(args, "--io-timeout-ms")? { self.io_timeout_ms = v; }
        if let Some(v) = parse_u64_arg(args, "--index-flush-ms")? { self.index_flush_ms = v; }
        if has_flag(args, "--no-persist") { self.persist_index = false; }
        Ok(())
    }

    /// Resolve the full configuration for the coordinator binary.
    pub fn from_env_and_args(args: &[String]) -> Result<Self> {
        let file = arg_value(args, "--config").or_else(|| std::env::var("SHARDFS_CONFIG").ok());
        let mut cfg = match file {
            Some(p) => Self::load(Path::new(&p))?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        cfg.apply_args(args)?;
        Ok(cfg)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_COORDINATOR_BIND.to_string(),
            root: home_dir().join("S1"),
            routes: default_routes(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            io_timeout_ms: Self::default_io_timeout_ms(),
            persist_index: true,
            index_flush_ms: Self::default_index_flush_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardConfig {
    pub bind: String,
    pub root: PathBuf,
    pub extension: String,
    #[serde(default = "default_true")]
    pub archivable: bool,
}

impl ShardConfig {
    /// Defaults for one of the known shard extensions; unknown extensions get
    /// a root named after the extension and must be given a bind address.
    pub fn for_extension(ext: &str) -> Self {
        let ext = normalize_extension(ext);
        let (port, dir, archivable) = match ext.as_str() {
            ".pdf" => (6501, "S2".to_string(), true),
            ".txt" => (6502, "S3".to_string(), true),
            ".zip" => (6503, "S4".to_string(), false),
            other => (0, format!("shard_{}", other.trim_start_matches('.')), true),
        };
        Self {
            bind: format!("0.0.0.0:{}", port),
            root: home_dir().join(dir),
            extension: ext,
            archivable,
        }
    }

    pub fn from_env_and_args(args: &[String]) -> Result<Self> {
        let ext = arg_value(args, "--extension")
            .or_else(|| std::env::var("SHARDFS_EXTENSION").ok())
            .context("--extension is required (e.g. --extension .pdf)")?;
        let mut cfg = Self::for_extension(&ext);
        if let Ok(v) = std::env::var("SHARDFS_BIND") { cfg.bind = v; }
        if let Ok(v) = std::env::var("SHARDFS_ROOT") { cfg.root = PathBuf::from(v); }
        if let Some(v) = arg_value(args, "--bind") { cfg.bind = v; }
        if let Some(v) = arg_value(args, "--root") { cfg.root = PathBuf::from(v); }
        if has_flag(args, "--no-archive") { cfg.archivable = false; }
        Ok(cfg)
    }
}

pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

pub fn parse_bool(v: &str) -> Result<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected one of 1/0, true/false, yes/no, on/off"),
    }
}

fn parse_u64_env(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{}='{}' is not a whole number of milliseconds", name, v)),
        Err(_) => Ok(None),
    }
}

/// Numeric value following `flag`. A flag given without a value, or with a
/// value that is not a number, is rejected.
fn parse_u64_arg(args: &[String], flag: &str) -> Result<Option<u64>> {
    if !has_flag(args, flag) {
        return Ok(None);
    }
    let v = arg_value(args, flag).with_context(|| format!("{} needs a value", flag))?;
    v.parse::<u64>()
        .map(Some)
        .with_context(|| format!("{} '{}' is not a whole number of milliseconds", flag, v))
}

/// Value following `flag` in the argument list.
pub fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
