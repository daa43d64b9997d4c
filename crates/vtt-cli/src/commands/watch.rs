//! `vtt watch` command: stream a session's broadcasts as NDJSON.

use anyhow::Result;
use clap::Args;
use serde_json::json;
use vtt_host::{RequestEnvelope, StreamEvent, control::PROTOCOL_VERSION};

use crate::opts::GlobalOpts;
use crate::output::print_line;

use super::control_client;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Session id
    pub session: String,

    /// Subscribing participant
    #[arg(long, env = "VTT_PARTICIPANT")]
    pub participant: String,
}

pub async fn cmd_watch(opts: &GlobalOpts, args: &WatchArgs) -> Result<()> {
    let mut client = control_client(opts).await?;
    let first = client
        .request(&RequestEnvelope {
            v: PROTOCOL_VERSION,
            id: "cli-watch".into(),
            cmd: "subscribe".into(),
            payload: json!({ "sessionId": args.session, "participant": args.participant }),
        })
        .await?;
    if !first.ok {
        let err = first.error.map(|e| format!("{}: {}", e.code, e.message));
        anyhow::bail!("subscribe failed: {}", err.unwrap_or_default());
    }
    if let Some(result) = &first.result {
        print_line(result)?;
    }

    while let Some(event) = client.next_event().await? {
        print_line(&serde_json::to_value(&event)?)?;
        if let StreamEvent::Closed { reason } = event {
            if !opts.quiet && reason != "ended" {
                eprintln!("notice: stream closed ({reason}); fetch full state to resync");
            }
            break;
        }
    }
    Ok(())
}
