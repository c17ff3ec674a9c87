// `mdroom whoami`: local identity and configured endpoints.

use clap::Args;
use serde::Serialize;

use crate::context::CliContext;
use crate::output;

#[derive(Debug, Args)]
pub struct WhoamiArgs {}

#[derive(Debug, Serialize)]
pub struct WhoamiResult {
    pub user_id: String,
    pub client_id: String,
    pub display_name: String,
    pub avatar_initial: char,
    pub avatar_color: String,
    pub api_url: String,
    pub collab_url: String,
}

pub fn run(ctx: &CliContext, _args: WhoamiArgs) -> anyhow::Result<()> {
    let user = ctx.user()?;
    let result = WhoamiResult {
        avatar_initial: user.avatar_initial(),
        avatar_color: user.avatar_color(),
        user_id: user.user_id,
        client_id: user.client_id,
        display_name: user.display_name,
        api_url: ctx.config.api_url.clone(),
        collab_url: ctx.config.collab_url.clone(),
    };
    output::print_output(ctx.format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &WhoamiResult) -> String {
    let user_id = if result.user_id.is_empty() { "(not set)" } else { result.user_id.as_str() };
    [
        format!("[{}] {}", result.avatar_initial, result.display_name),
        format!("  user id:   {user_id}"),
        format!("  client id: {}", result.client_id),
        format!("  backend:   {}", result.api_url),
        format!("  collab:    {}", result.collab_url),
    ]
    .join("\n")
}
