//!
//! shardfs client binary
//! ---------------------
//! Interactive shell for a shardfs coordinator. Downloads and archives are
//! written to the downloads directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use shardfs::cli::{execute, help_text, parse_input, ClientAction};
use shardfs::client::CoordinatorClient;
use shardfs::config::{arg_value, has_flag, home_dir};

const PROMPT: &str = "shardfs$ ";

fn print_usage() {
    eprintln!(
        "Usage:\n  shardfs_client [--connect ADDR] [--downloads DIR]\n\nFlags:\n  --connect ADDR    coordinator address (env: SHARDFS_COORDINATOR, default 127.0.0.1:6500)\n  --downloads DIR   where downloads and archives are saved (default $HOME/shardfs_downloads)\n\n{}",
        help_text()
    );
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }
    let addr = arg_value(&args, "--connect")
        .or_else(|| std::env::var("SHARDFS_COORDINATOR").ok())
        .unwrap_or_else(|| "127.0.0.1:6500".to_string());
    let downloads = arg_value(&args, "--downloads")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join("shardfs_downloads"));

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let mut client = rt
        .block_on(CoordinatorClient::connect(&addr))
        .with_context(|| format!("connecting to coordinator at {}", addr))?;
    println!("Connected to {}. Type 'help' for commands.", addr);

    let mut editor = DefaultEditor::new().context("initialising line editor")?;
    loop {
        let line = match editor.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let action = match parse_input(&line) {
            Ok(Some(a)) => a,
            Ok(None) => continue,
            Err(usage) => {
                eprintln!("{}", usage);
                continue;
            }
        };
        let _ = editor.add_history_entry(line.trim());
        match action {
            ClientAction::Quit => break,
            ClientAction::Help => println!("{}", help_text()),
            action => match rt.block_on(execute(&mut client, &action, &downloads)) {
                Ok(out) => println!("{}", out),
                Err(e) if e.is_request_scoped() => eprintln!("Error: {}", e.message()),
                Err(e) => {
                    eprintln!("Connection lost: {}", e.message());
                    break;
                }
            },
        }
    }
    Ok(())
}
