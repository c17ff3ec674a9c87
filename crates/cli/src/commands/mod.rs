// CLI subcommand dispatch.

use clap::Subcommand;

use crate::context::{CliContext, GlobalArgs};

pub mod create;
pub mod open;
pub mod rooms;
pub mod show;
pub mod whoami;

#[derive(Subcommand)]
pub enum Command {
    /// List rooms you can access, grouped by owner
    Rooms(rooms::RoomsArgs),
    /// Create a new room
    Create(create::CreateArgs),
    /// Print the stored content of a room
    Show(show::ShowArgs),
    /// Show the local identity and configured endpoints
    Whoami(whoami::WhoamiArgs),
    /// Attach to a room and edit it interactively
    Open(open::OpenArgs),
}

pub fn run(global: GlobalArgs, cmd: Command) -> anyhow::Result<()> {
    let ctx = CliContext::from_args(&global)?;
    match cmd {
        Command::Rooms(args) => rooms::run(&ctx, args),
        Command::Create(args) => create::run(&ctx, args),
        Command::Show(args) => show::run(&ctx, args),
        Command::Whoami(args) => whoami::run(&ctx, args),
        Command::Open(args) => open::run(&ctx, args),
    }
}
