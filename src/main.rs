//!
//! shardfs coordinator binary
//! --------------------------
//! Client-facing entry point. Stores `.c` files (by default) under its own
//! root and forwards every other registered type to its shard.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use shardfs::config::{has_flag, CoordinatorConfig};

const USAGE: &str = "shardfs coordinator\n\nUSAGE:\n  shardfs [--config FILE] [--bind ADDR] [--root PATH] [--connect-timeout-ms N] [--io-timeout-ms N] [--index-flush-ms N] [--no-persist]\n\nOPTIONS:\n  --config FILE            JSON configuration (env: SHARDFS_CONFIG)\n  --bind ADDR              listen address (env: SHARDFS_BIND, default 0.0.0.0:6500)\n  --root PATH              local storage root (env: SHARDFS_ROOT, default $HOME/S1)\n  --connect-timeout-ms N   shard connect timeout (env: SHARDFS_CONNECT_TIMEOUT_MS, default 3000)\n  --io-timeout-ms N        shard read/write timeout (env: SHARDFS_IO_TIMEOUT_MS, default 30000)\n  --index-flush-ms N       index snapshot interval (env: SHARDFS_INDEX_FLUSH_MS, default 1000)\n  --no-persist             keep the metadata index in memory only (env: SHARDFS_PERSIST_INDEX=false)\n";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let cfg = CoordinatorConfig::from_env_and_args(&args)?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "shardfs coordinator starting: RUST_LOG='{}', bind={}, root='{}', routes={}, connect_timeout_ms={}, io_timeout_ms={}, persist_index={}, index_flush_ms={}",
        rust_log,
        cfg.bind,
        cfg.root.display(),
        cfg.routes.len(),
        cfg.connect_timeout_ms,
        cfg.io_timeout_ms,
        cfg.persist_index,
        cfg.index_flush_ms
    );
    shardfs::coordinator::run(cfg).await
}
