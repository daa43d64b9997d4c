//! Environment, logging, and input helpers.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Load `.env` from the store directory without overriding existing variables.
pub fn load_store_env(store_root: &Path) -> Result<()> {
    let env_path = store_root.join(".env");
    if env_path.exists() {
        for item in dotenvy::from_path_iter(&env_path).context("load .env")? {
            let (key, val) = item?;
            if std::env::var_os(&key).is_none() {
                unsafe {
                    std::env::set_var(&key, &val);
                }
            }
        }
    }
    Ok(())
}

/// Set up the tracing subscriber for daemon logging; `RUST_LOG` overrides the `info` default.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

/// Parse JSON from an inline argument, `@file`, or `-` for stdin.
pub fn read_json_arg(arg: &str) -> Result<serde_json::Value> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read stdin")?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("read {path}"))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&text).context("parse JSON input")
}
