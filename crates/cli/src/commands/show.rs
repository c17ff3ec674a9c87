// `mdroom show`: print the stored content of a room after a view check.

use anyhow::Context;
use clap::Args;
use mdroom_client::api::RoomDirectory;
use mdroom_client::permission::{Access, GuardedGate};
use mdroom_common::types::{RoomContent, RoomId};
use std::sync::Arc;

use crate::context::{block_on, CliContext};
use crate::exit_code::AccessDenied;
use crate::output;

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Room id.
    pub room: RoomId,
}

pub fn run(ctx: &CliContext, args: ShowArgs) -> anyhow::Result<()> {
    let api = Arc::new(ctx.api()?);
    let gate = GuardedGate::new(api.clone(), ctx.config.timeouts.permission());
    let room = args.room;

    let content = block_on(async {
        if !gate.allows(Access::View, &room).await {
            return Err(anyhow::Error::new(AccessDenied(room.to_string())));
        }
        api.fetch_content(&room)
            .await
            .with_context(|| format!("failed to fetch content of room `{room}`"))
    })??;

    output::print_output(ctx.format, &content, |content: &RoomContent| {
        content.content.trim_end_matches('\n').to_string()
    })?;
    Ok(())
}
