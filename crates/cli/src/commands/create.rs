// `mdroom create`: create a room owned by the configured user.

use anyhow::{bail, Context};
use clap::Args;
use mdroom_client::api::RoomDirectory;
use mdroom_common::types::CreatedRoom;

use crate::context::{block_on, CliContext};
use crate::output;

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Room name.
    pub name: String,
}

pub fn run(ctx: &CliContext, args: CreateArgs) -> anyhow::Result<()> {
    let name = args.name.trim();
    if name.is_empty() {
        bail!("room name must not be empty");
    }
    let api = ctx.api()?;
    let created = block_on(async { api.create_room(name).await })?
        .with_context(|| format!("failed to create room `{name}`"))?;
    output::print_output(ctx.format, &created, format_human)?;
    Ok(())
}

fn format_human(created: &CreatedRoom) -> String {
    format!(
        "Created room {} ({}) on {}\nOpen it with: mdroom open {}",
        created.room_name, created.room_id, created.created_at, created.room_id
    )
}
