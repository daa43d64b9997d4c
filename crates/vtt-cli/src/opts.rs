//! Global CLI options and path resolution.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

/// Global options for CLI commands.
///
/// These options apply to all commands and can be set via env vars.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Store directory holding `.vtt/` (env: VTT_STORE, default: current directory)
    #[arg(long, global = true, env = "VTT_STORE")]
    pub store: Option<PathBuf>,

    /// Control socket override (env: VTT_CONTROL, default: <store>/.vtt/control.sock)
    #[arg(long, global = true, env = "VTT_CONTROL")]
    pub control: Option<PathBuf>,

    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Suppress notices
    #[arg(long, global = true)]
    pub quiet: bool,
}

pub fn store_root(opts: &GlobalOpts) -> Result<PathBuf> {
    match &opts.store {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("get current directory"),
    }
}

pub fn control_socket(opts: &GlobalOpts) -> Result<PathBuf> {
    if let Some(path) = &opts.control {
        return Ok(path.clone());
    }
    Ok(store_root(opts)?.join(".vtt").join("control.sock"))
}
