//! `vtt session ...` commands: lifecycle calls against a running daemon.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::{Value as JsonValue, json};

use crate::opts::GlobalOpts;
use crate::output::print_success;
use crate::util::read_json_arg;

use super::control_client;

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Start a session
    Create(CreateArgs),
    /// End a session and wait for its final sync
    End(SessionArgs),
    /// List live and stored sessions
    List,
    /// Replace the observer list of a session
    Participants(ParticipantsArgs),
    /// Mark the writer as attached
    Connect(ConnectArgs),
    /// Mark the writer as detached
    Disconnect(SessionArgs),
    /// Force a durable write (all sessions when no id is given)
    Flush(FlushArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Writer participant id
    #[arg(long)]
    pub writer: String,

    /// Session id (default: random UUID)
    #[arg(long)]
    pub id: Option<String>,

    /// Observer ids, comma separated or repeated
    #[arg(long = "participant", value_delimiter = ',')]
    pub participants: Vec<String>,

    /// Initial state as inline JSON, `@file`, or `-` for stdin
    #[arg(long)]
    pub initial: Option<String>,
}

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Session id
    pub session: String,
}

#[derive(Args, Debug)]
pub struct ParticipantsArgs {
    /// Session id
    pub session: String,

    /// New observer list, comma separated
    #[arg(value_delimiter = ',')]
    pub participants: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Session id
    pub session: String,

    /// Writer participant id
    #[arg(long)]
    pub writer: String,
}

#[derive(Args, Debug)]
pub struct FlushArgs {
    /// Session id
    pub session: Option<String>,
}

pub async fn cmd_session(opts: &GlobalOpts, cmd: &SessionCommand) -> Result<()> {
    let (name, payload) = match cmd {
        SessionCommand::Create(args) => {
            let mut payload = json!({
                "writer": args.writer,
                "participants": args.participants,
            });
            if let Some(obj) = payload.as_object_mut() {
                if let Some(id) = &args.id {
                    obj.insert("sessionId".into(), json!(id));
                }
                if let Some(initial) = &args.initial {
                    obj.insert("initialState".into(), read_json_arg(initial)?);
                }
            }
            ("session-create", payload)
        }
        SessionCommand::End(args) => ("session-end", json!({ "sessionId": args.session })),
        SessionCommand::List => ("session-list", json!({})),
        SessionCommand::Participants(args) => (
            "participants-set",
            json!({ "sessionId": args.session, "participants": args.participants }),
        ),
        SessionCommand::Connect(args) => (
            "writer-connect",
            json!({ "sessionId": args.session, "writer": args.writer }),
        ),
        SessionCommand::Disconnect(args) => {
            ("writer-disconnect", json!({ "sessionId": args.session }))
        }
        SessionCommand::Flush(args) => match &args.session {
            Some(session) => ("flush", json!({ "sessionId": session })),
            None => ("flush", JsonValue::Null),
        },
    };

    let mut client = control_client(opts).await?;
    let result = client.call(name, payload).await?;
    let mut warnings = Vec::new();
    if let SessionCommand::End(_) = cmd {
        if result["persisted"] == json!(false) {
            warnings.push("final sync did not reach the store".to_string());
        }
    }
    print_success(opts, result, warnings)
}
