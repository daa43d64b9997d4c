//! Long-lived host mode: the control server plus a registry that is flushed
//! on the way out.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::control::ControlServer;
use crate::error::HostError;
use crate::registry::SessionRegistry;

/// Session daemon.
///
/// The daemon owns:
/// - the [`SessionRegistry`] every control connection dispatches into
/// - the control server task bound to `control_path`
/// - a shutdown channel shared with the server and signal handlers
pub struct Daemon {
    registry: Arc<SessionRegistry>,
    control_path: PathBuf,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    control_server: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(
        registry: Arc<SessionRegistry>,
        control_path: impl Into<PathBuf>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let shutdown_rx = shutdown_tx.subscribe();
        Self {
            registry,
            control_path: control_path.into(),
            shutdown_tx,
            shutdown_rx,
            control_server: None,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run until a shutdown is requested over the control socket or by the
    /// caller's sender, then flush every live session.
    pub async fn run(&mut self) -> Result<(), HostError> {
        let server = ControlServer::new(
            self.control_path.clone(),
            Arc::clone(&self.registry),
            self.shutdown_tx.clone(),
        );
        self.control_server = Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("control server error: {e}");
            }
        }));
        tracing::info!(socket = %self.control_path.display(), "session daemon started");

        // A lagged or closed channel means the same thing here.
        let _ = self.shutdown_rx.recv().await;
        tracing::info!("shutdown signal received");

        self.registry.shutdown().await;
        if let Some(handle) = self.control_server.take() {
            let _ = handle.await;
        }
        if self.control_path.exists() {
            let _ = std::fs::remove_file(&self.control_path);
        }
        tracing::info!("session daemon stopped");
        Ok(())
    }
}
