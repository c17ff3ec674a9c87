// `mdroom open`: attach to a room and drive it from a line-oriented prompt.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use mdroom_client::controller::{Notice, SessionSnapshot};
use mdroom_client::engine::ydoc::TextEdit;
use mdroom_client::runtime::{
    RuntimeError, RuntimeSettings, SessionDeps, SessionHandle, SessionManager,
};
use mdroom_client::session::ws::WsSessionProvider;
use mdroom_common::types::RoomId;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::context::{block_on, CliContext};
use crate::output::{self, OutputFormat};

const HELP: &str = "\
commands:
  edit                   request edit permission
  insert <pos> <text>    insert text at a character offset (\\n for newline)
  delete <pos> <len>     delete characters
  save                   store the document on the backend
  select <room>          switch to another room
  close                  leave the current room
  status                 print the session state and document
  quit                   leave and exit";

#[derive(Debug, Args)]
pub struct OpenArgs {
    /// Room id.
    pub room: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Edit,
    Insert { pos: u32, text: String },
    Delete { pos: u32, len: u32 },
    Save,
    Select(RoomId),
    Close,
    Status,
    Help,
    Quit,
}

pub fn run(ctx: &CliContext, args: OpenArgs) -> anyhow::Result<()> {
    let api = Arc::new(ctx.api()?);
    let user = ctx.user()?;
    let settings = RuntimeSettings::from_config(&ctx.config);
    let format = ctx.format;

    block_on(async move {
        let manager = SessionManager::spawn(SessionDeps {
            user,
            gate: api.clone(),
            directory: api,
            sessions: Arc::new(WsSessionProvider::default()),
            settings,
        });
        let result = interact(manager.handle(), args.room, format).await;
        manager.wait().await;
        result
    })?
}

async fn interact(handle: SessionHandle, room: RoomId, format: OutputFormat) -> anyhow::Result<()> {
    let mut snapshots = handle.subscribe();
    let mut notices = handle.notices();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last = snapshots.borrow().clone();

    if format == OutputFormat::Human {
        println!("opening {room}; type `help` for commands");
    }
    handle.select_room(Some(room))?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = snapshots.borrow_and_update().clone();
                report_snapshot(format, &last, &current)?;
                last = current;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => report_notice(format, &notice)?,
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "notices lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(ReplCommand::Quit)) => break,
                    Ok(Some(command)) => execute(&handle, command, format, &last).await?,
                    Err(message) => output::print_warning(format, "USAGE", &message),
                }
            }
        }
    }
    Ok(())
}

async fn execute(
    handle: &SessionHandle,
    command: ReplCommand,
    format: OutputFormat,
    snapshot: &SessionSnapshot,
) -> anyhow::Result<()> {
    let edit = match command {
        ReplCommand::Edit => return Ok(handle.request_edit()?),
        ReplCommand::Save => return Ok(handle.save()?),
        ReplCommand::Select(room) => return Ok(handle.select_room(Some(room))?),
        ReplCommand::Close => return Ok(handle.select_room(None)?),
        ReplCommand::Status => {
            output::print_output(format, snapshot, format_status)?;
            return Ok(());
        }
        ReplCommand::Help => {
            println!("{HELP}");
            return Ok(());
        }
        ReplCommand::Quit => return Ok(()),
        ReplCommand::Insert { pos, text } => TextEdit::insert(pos, text),
        ReplCommand::Delete { pos, len } => TextEdit::delete(pos, len),
    };

    match handle.edit(edit).await {
        Ok(()) => Ok(()),
        Err(RuntimeError::Edit(error)) => {
            output::print_warning(format, "EDIT_REJECTED", &error.to_string());
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

fn parse_line(line: &str) -> Result<Option<ReplCommand>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let (word, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    let rest = rest.trim_start();

    let command = match word {
        "edit" => ReplCommand::Edit,
        "save" => ReplCommand::Save,
        "close" => ReplCommand::Close,
        "status" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        "select" => {
            let room = rest.parse().map_err(|error| format!("select: {error}"))?;
            ReplCommand::Select(room)
        }
        "insert" => {
            let (pos, text) = rest
                .split_once(' ')
                .ok_or_else(|| "usage: insert <pos> <text>".to_string())?;
            ReplCommand::Insert { pos: parse_number("insert", pos)?, text: text.replace("\\n", "\n") }
        }
        "delete" => {
            let mut parts = rest.split_whitespace();
            let (Some(pos), Some(len), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err("usage: delete <pos> <len>".to_string());
            };
            ReplCommand::Delete { pos: parse_number("delete", pos)?, len: parse_number("delete", len)? }
        }
        other => return Err(format!("unknown command `{other}`; type `help`")),
    };
    Ok(Some(command))
}

fn parse_number(command: &str, value: &str) -> Result<u32, String> {
    value.trim().parse().map_err(|_| format!("{command}: `{value}` is not a character offset"))
}

// ── Reporting ──────────────────────────────────────────────────────

fn report_snapshot(
    format: OutputFormat,
    previous: &SessionSnapshot,
    current: &SessionSnapshot,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            output::print_output(format, &json!({ "event": "snapshot", "snapshot": current }), |_| {
                String::new()
            })?;
        }
        OutputFormat::Human => {
            for line in describe_changes(previous, current) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn report_notice(format: OutputFormat, notice: &Notice) -> anyhow::Result<()> {
    match (format, notice) {
        (OutputFormat::Json, _) => {
            output::print_output(format, &json!({ "event": "notice", "notice": notice }), |_| {
                String::new()
            })?;
        }
        (OutputFormat::Human, Notice::Saved { room }) => println!("saved {room}"),
        (OutputFormat::Human, Notice::EditDenied { room }) => {
            output::print_warning(format, "EDIT_DENIED", &format!("no edit permission for {room}"));
        }
        (OutputFormat::Human, Notice::SaveFailed { room, reason }) => {
            output::print_warning(format, "SAVE_FAILED", &format!("saving {room} failed: {reason}"));
        }
        (OutputFormat::Human, Notice::AttachFailed { room, reason }) => {
            output::print_warning(format, "ATTACH_FAILED", &format!("could not attach {room}: {reason}"));
        }
    }
    Ok(())
}

fn describe_changes(previous: &SessionSnapshot, current: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if previous.active_room != current.active_room {
        match &current.active_room {
            Some(room) => lines.push(format!("attached to {room} (read-only)")),
            None if previous.active_room.is_some() => lines.push("left room".to_string()),
            None => {}
        }
    }
    if previous.has_access && !current.has_access {
        let room = current.selected_room.as_ref().map(ToString::to_string).unwrap_or_default();
        lines.push(format!("no access to {room}"));
    }
    if previous.connection_status != current.connection_status {
        lines.push(format!("status: {}", current.connection_status));
    }
    if previous.peer_count != current.peer_count && current.active_room.is_some() {
        lines.push(format!("{} peer(s): {}", current.peer_count, current.peers.join(", ")));
    }
    if previous.editing_enabled != current.editing_enabled {
        lines.push(if current.editing_enabled { "editing enabled" } else { "read-only" }.to_string());
    }
    if previous.preview_text != current.preview_text && current.active_room.is_some() {
        lines.push(format!("document updated ({} chars)", current.preview_text.chars().count()));
    }
    lines
}

fn format_status(snapshot: &SessionSnapshot) -> String {
    let room = snapshot.active_room.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into());
    let mode = if snapshot.editing_enabled { "editing" } else { "read-only" };
    format!(
        "room: {room}  status: {}  peers: {}  mode: {mode}\n---\n{}",
        snapshot.connection_status, snapshot.peer_count, snapshot.preview_text
    )
}
