//!
//! shardfs shard binary
//! --------------------
//! Backend server holding the files of a single extension. Only the
//! coordinator talks to it.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use shardfs::config::{has_flag, ShardConfig};

const USAGE: &str = "shardfs shard\n\nUSAGE:\n  shardfs_shard --extension EXT [--bind ADDR] [--root PATH] [--no-archive]\n\nOPTIONS:\n  --extension EXT   file type served, e.g. .pdf (env: SHARDFS_EXTENSION)\n  --bind ADDR       listen address (env: SHARDFS_BIND; .pdf 6501, .txt 6502, .zip 6503)\n  --root PATH       storage root (env: SHARDFS_ROOT; .pdf $HOME/S2, .txt $HOME/S3, .zip $HOME/S4)\n  --no-archive      refuse downltar requests\n";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let cfg = ShardConfig::from_env_and_args(&args)?;
    info!(
        target: "startup",
        "shardfs shard starting: extension={}, bind={}, root='{}', archivable={}",
        cfg.extension,
        cfg.bind,
        cfg.root.display(),
        cfg.archivable
    );
    shardfs::shard::run(cfg).await
}
