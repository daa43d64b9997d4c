//! `vtt hash` command.

use anyhow::Result;
use clap::Args;
use serde_json::json;
use vtt_kernel::canonical_hash;
use vtt_types::Value;

use crate::opts::GlobalOpts;
use crate::output::print_success;
use crate::util::read_json_arg;

#[derive(Args, Debug)]
pub struct HashArgs {
    /// State as inline JSON, `@file`, or `-` for stdin
    pub state: String,
}

/// Print the canonical hash of a state document without touching a daemon.
pub fn cmd_hash(opts: &GlobalOpts, args: &HashArgs) -> Result<()> {
    let value = Value::from(read_json_arg(&args.state)?);
    let hash = canonical_hash(&value)?;
    print_success(opts, json!(hash.to_hex()), vec![])
}
