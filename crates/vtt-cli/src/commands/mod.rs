pub mod hash;
pub mod inspect;
pub mod serve;
pub mod session;
pub mod state;
pub mod update;
pub mod watch;

use anyhow::{Context, Result};
use vtt_host::ControlClient;

use crate::opts::{GlobalOpts, control_socket};

/// Connect to a running `vtt serve`.
pub(crate) async fn control_client(opts: &GlobalOpts) -> Result<ControlClient> {
    let path = control_socket(opts)?;
    ControlClient::connect(&path).await.with_context(|| {
        format!(
            "connect to control socket {} (is `vtt serve` running?)",
            path.display()
        )
    })
}
