//! `vtt update` command: submit one writer batch.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use vtt_types::{StateOperation, StateUpdateResponse};

use crate::opts::GlobalOpts;
use crate::output::print_success;
use crate::util::read_json_arg;

use super::control_client;

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Session id
    pub session: String,

    /// Version the batch was built against
    #[arg(long)]
    pub base: u64,

    /// Operations array as inline JSON, `@file`, or `-` for stdin
    #[arg(long)]
    pub ops: String,

    /// Submitting participant (must be the session writer)
    #[arg(long, env = "VTT_PARTICIPANT")]
    pub submitter: String,

    /// Request id echoed in logs (default: cli-<base>)
    #[arg(long)]
    pub request_id: Option<String>,
}

pub async fn cmd_update(opts: &GlobalOpts, args: &UpdateArgs) -> Result<()> {
    // Decode locally so malformed operations fail before reaching the daemon.
    let operations: Vec<StateOperation> =
        serde_json::from_value(read_json_arg(&args.ops)?).context("decode operations")?;
    let request_id = args
        .request_id
        .clone()
        .unwrap_or_else(|| format!("cli-{}", args.base));
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut client = control_client(opts).await?;
    let result = client
        .call(
            "state-update",
            json!({
                "submitter": args.submitter,
                "update": {
                    "requestId": request_id,
                    "sessionId": args.session,
                    "baseVersion": args.base.to_string(),
                    "operations": operations,
                    "timestamp": timestamp,
                }
            }),
        )
        .await?;
    let response: StateUpdateResponse =
        serde_json::from_value(result.clone()).context("decode update response")?;
    if let Some(err) = response.error {
        print_success(opts, result, vec![])?;
        anyhow::bail!("update rejected ({}): {}", err.code, err.message);
    }
    print_success(opts, result, vec![])
}
