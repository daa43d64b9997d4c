mod commands;
mod opts;
mod output;
mod util;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::hash::HashArgs;
use commands::inspect::InspectArgs;
use commands::serve::ServeArgs;
use commands::session::SessionCommand;
use commands::state::StateArgs;
use commands::update::UpdateArgs;
use commands::watch::WatchArgs;
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "vtt", version, about = "Tabletop session state engine")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the session daemon on the control socket
    Serve(ServeArgs),

    /// Ask a running daemon to flush and exit
    Shutdown,

    /// Session lifecycle commands
    #[command(subcommand)]
    Session(SessionCommand),

    /// Submit a writer batch
    Update(UpdateArgs),

    /// Fetch the full state of a session
    State(StateArgs),

    /// Stream accepted batches of a session
    Watch(WatchArgs),

    /// Canonical hash of a state document (offline)
    Hash(HashArgs),

    /// Read persisted sessions from the store (offline)
    Inspect(InspectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    match &cli.command {
        Command::Serve(args) => commands::serve::cmd_serve(opts, args).await,
        Command::Shutdown => commands::serve::cmd_shutdown(opts).await,
        Command::Session(cmd) => commands::session::cmd_session(opts, cmd).await,
        Command::Update(args) => commands::update::cmd_update(opts, args).await,
        Command::State(args) => commands::state::cmd_state(opts, args).await,
        Command::Watch(args) => commands::watch::cmd_watch(opts, args).await,
        Command::Hash(args) => commands::hash::cmd_hash(opts, args),
        Command::Inspect(args) => commands::inspect::cmd_inspect(opts, args),
    }
}
