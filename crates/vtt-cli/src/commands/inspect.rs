//! `vtt inspect` command: read persisted sessions straight from the store.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use vtt_store::{DocumentStore, FsStore};
use vtt_types::SessionId;

use crate::opts::{GlobalOpts, store_root};
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session to show; lists every stored session when omitted
    pub session: Option<String>,

    /// Include the full state document
    #[arg(long)]
    pub state: bool,

    /// Include the exploded entity rows
    #[arg(long)]
    pub entities: bool,
}

pub fn cmd_inspect(opts: &GlobalOpts, args: &InspectArgs) -> Result<()> {
    let store = FsStore::open(store_root(opts)?).context("open store")?;

    let Some(session) = &args.session else {
        let ids: Vec<String> = store
            .list_sessions()?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        return print_success(opts, json!(ids), vec![]);
    };

    let id = SessionId::new(session.clone());
    let record = store
        .get_session(&id)?
        .with_context(|| format!("session '{session}' not found in store"))?;
    let mut data = json!({
        "sessionId": record.session_id,
        "writer": record.writer,
        "participants": record.participants,
        "status": record.status,
        "version": record.version,
        "hash": record.hash,
        "syncedAtMs": record.synced_at_ms,
    });
    if let Some(obj) = data.as_object_mut() {
        if args.state {
            obj.insert("state".into(), serde_json::Value::from(&record.state));
        }
        if args.entities {
            obj.insert("entities".into(), serde_json::to_value(store.get_entities(&id)?)?);
        }
    }
    print_success(opts, data, vec![])
}
