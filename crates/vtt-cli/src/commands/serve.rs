//! `vtt serve` command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tokio::sync::broadcast;
use vtt_host::{ControlClient, Daemon, HostConfig, SessionRegistry};
use vtt_store::{DynStore, FsStore};

use crate::opts::{GlobalOpts, control_socket, store_root};
use crate::output::print_success;
use crate::util::{load_store_env, setup_logging};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Durable sync period in milliseconds (overrides VTT_SYNC_INTERVAL_MS)
    #[arg(long)]
    pub sync_interval_ms: Option<u64>,
}

pub async fn cmd_serve(opts: &GlobalOpts, args: &ServeArgs) -> Result<()> {
    let root = store_root(opts)?;
    let control_path = control_socket(opts)?;

    // A live daemon answers `session-list`; anything else is a stale socket.
    if control_path.exists() {
        let healthy = match ControlClient::connect(&control_path).await {
            Ok(mut client) => client.call("session-list", json!({})).await.is_ok(),
            Err(_) => false,
        };
        if healthy {
            return print_success(
                opts,
                json!({ "daemon": "running", "socket": control_path }),
                vec![],
            );
        }
        anyhow::bail!(
            "stale control socket at {}; remove it if no daemon is running",
            control_path.display()
        );
    }

    load_store_env(&root)?;
    setup_logging();

    let mut config = HostConfig::from_env()?;
    if let Some(ms) = args.sync_interval_ms {
        config.sync_interval = Duration::from_millis(ms.max(1));
    }
    let store: DynStore = Arc::new(FsStore::open(&root).context("open store")?);
    if let Some(parent) = control_path.parent() {
        std::fs::create_dir_all(parent).context("create control socket directory")?;
    }
    let registry = Arc::new(SessionRegistry::new(config, store));
    let (shutdown_tx, _) = broadcast::channel(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let sigterm = async {
            match term.as_mut() {
                Some(t) => {
                    t.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, stopping daemon"),
            _ = sigterm => tracing::info!("SIGTERM received, stopping daemon"),
        }
        let _ = signal_tx.send(());
    });

    let mut daemon = Daemon::new(registry, control_path, shutdown_tx);
    daemon.run().await?;
    Ok(())
}

/// `vtt shutdown`: ask a running daemon to flush and exit.
pub async fn cmd_shutdown(opts: &GlobalOpts) -> Result<()> {
    let mut client = super::control_client(opts).await?;
    client.call("shutdown", json!({})).await?;
    print_success(opts, json!("daemon shutdown initiated"), vec![])
}
