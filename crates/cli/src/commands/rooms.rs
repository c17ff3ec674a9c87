// `mdroom rooms`: rooms visible to the configured user.

use std::collections::BTreeMap;

use anyhow::Context;
use clap::Args;
use mdroom_client::api::RoomDirectory;
use mdroom_common::types::RoomSummary;

use crate::context::{block_on, CliContext};
use crate::output;

#[derive(Debug, Args)]
pub struct RoomsArgs {}

pub fn run(ctx: &CliContext, _args: RoomsArgs) -> anyhow::Result<()> {
    let api = ctx.api()?;
    let rooms = block_on(async { api.list_rooms().await })?.context("failed to list rooms")?;
    output::print_output(ctx.format, &rooms, |rooms| format_human(rooms))?;
    Ok(())
}

fn format_human(rooms: &[RoomSummary]) -> String {
    if rooms.is_empty() {
        return "No rooms yet. Create one with: mdroom create <name>".into();
    }

    let mut by_owner: BTreeMap<&str, Vec<&RoomSummary>> = BTreeMap::new();
    for room in rooms {
        by_owner.entry(room.owner_name.as_str()).or_default().push(room);
    }

    let mut lines = vec![format!("{} room(s)", rooms.len())];
    for (owner, owned) in by_owner {
        lines.push(format!("{owner}:"));
        for room in owned {
            lines.push(format!("  {}  {}", room.room_id, room.room_name));
        }
    }
    lines.join("\n")
}
