//! `vtt state` command: fetch the authoritative state of a session.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::control_client;

#[derive(Args, Debug)]
pub struct StateArgs {
    /// Session id
    pub session: String,

    /// Requesting participant
    #[arg(long, env = "VTT_PARTICIPANT")]
    pub requester: String,

    /// Cached version; the state is only sent when it differs
    #[arg(long, requires = "cached_hash")]
    pub cached_version: Option<u64>,

    /// Cached hash (`sha256:<hex>`)
    #[arg(long, requires = "cached_version")]
    pub cached_hash: Option<String>,
}

pub async fn cmd_state(opts: &GlobalOpts, args: &StateArgs) -> Result<()> {
    let mut request = json!({ "sessionId": args.session });
    if let (Some(version), Some(hash), Some(obj)) = (
        args.cached_version,
        args.cached_hash.as_ref(),
        request.as_object_mut(),
    ) {
        obj.insert("cachedVersion".into(), json!(version.to_string()));
        obj.insert("cachedHash".into(), json!(hash));
    }
    let mut client = control_client(opts).await?;
    let result = client
        .call(
            "full-state",
            json!({ "requester": args.requester, "request": request }),
        )
        .await
        .context("fetch full state")?;
    print_success(opts, result, vec![])
}
