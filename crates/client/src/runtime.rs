// Session runtime: the single task that owns the room controller.
//
// Commands from the presentation layer, resolved continuations and session
// events are processed one at a time. Every suspension point (permission
// checks, saves, connect deadlines) runs as a spawned task that reports back
// through the continuation channel with the token it started under.

use std::sync::Arc;
use std::time::Duration;

use mdroom_common::types::{RoomId, UserContext};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::RoomDirectory;
use crate::config::ClientConfig;
use crate::controller::{
    ControllerSettings, EditError, Effect, Notice, RoomController, SessionSnapshot,
};
use crate::engine::ydoc::TextEdit;
use crate::permission::{Access, GuardedGate, PermissionGate};
use crate::session::{SessionEnvelope, SessionProvider};
use crate::token::SwitchToken;

const NOTICE_BUFFER_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session runtime has stopped")]
    Stopped,
    #[error(transparent)]
    Edit(#[from] EditError),
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub collab_url: String,
    pub cache_capacity: usize,
    pub default_content: String,
    pub permission_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl RuntimeSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            collab_url: config.collab_url.clone(),
            cache_capacity: config.cache.capacity,
            default_content: config.default_content.clone(),
            permission_timeout: config.timeouts.permission(),
            connect_timeout: config.timeouts.connect(),
        }
    }
}

/// Everything the runtime needs from the outside world.
pub struct SessionDeps {
    pub user: UserContext,
    pub gate: Arc<dyn PermissionGate>,
    pub directory: Arc<dyn RoomDirectory>,
    pub sessions: Arc<dyn SessionProvider>,
    pub settings: RuntimeSettings,
}

enum Command {
    SelectRoom(Option<RoomId>),
    RequestEdit,
    Save,
    Edit { edit: TextEdit, reply: oneshot::Sender<Result<(), EditError>> },
    Shutdown { ack: oneshot::Sender<()> },
}

enum Continuation {
    View { token: SwitchToken, room: RoomId, allowed: bool },
    Edit { token: SwitchToken, room: RoomId, allowed: bool },
    Persisted { room: RoomId, result: Result<(), String> },
    ConnectDeadline { token: SwitchToken },
}

/// Cloneable front door to the runtime task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl SessionHandle {
    /// Fire-and-forget; completion is observed through `subscribe`.
    pub fn select_room(&self, room: Option<RoomId>) -> Result<(), RuntimeError> {
        self.send(Command::SelectRoom(room))
    }

    pub fn request_edit(&self) -> Result<(), RuntimeError> {
        self.send(Command::RequestEdit)
    }

    pub fn save(&self) -> Result<(), RuntimeError> {
        self.send(Command::Save)
    }

    pub async fn edit(&self, edit: TextEdit) -> Result<(), RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Edit { edit, reply })?;
        response.await.map_err(|_| RuntimeError::Stopped)??;
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Tear down every room resource and stop the runtime task.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown { ack })?;
        done.await.map_err(|_| RuntimeError::Stopped)
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).map_err(|_| RuntimeError::Stopped)
    }
}

pub struct SessionManager {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

impl SessionManager {
    /// Spawn the runtime task on the current tokio runtime.
    pub fn spawn(deps: SessionDeps) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (continuations_tx, continuations_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (notices_tx, _) = broadcast::channel(NOTICE_BUFFER_SIZE);

        let SessionDeps { user, gate, directory, sessions, settings } = deps;
        let controller = RoomController::new(
            user,
            ControllerSettings {
                collab_url: settings.collab_url,
                cache_capacity: settings.cache_capacity,
                default_content: settings.default_content,
                connect_timeout: settings.connect_timeout,
            },
            sessions,
            events_tx,
        );

        let actor = SessionActor {
            controller,
            gate: GuardedGate::new(gate, settings.permission_timeout),
            directory,
            connect_timeout: settings.connect_timeout,
            continuations_tx,
            snapshot_tx,
            notices_tx: notices_tx.clone(),
        };
        let task = tokio::spawn(actor.run(commands_rx, continuations_rx, events_rx));

        info!("session runtime started");
        Self {
            handle: SessionHandle { commands: commands_tx, snapshots: snapshot_rx, notices: notices_tx },
            task,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Shut down and wait for the runtime task to finish.
    pub async fn wait(self) {
        let _ = self.handle.shutdown().await;
        let _ = self.task.await;
    }
}

struct SessionActor {
    controller: RoomController,
    gate: GuardedGate,
    directory: Arc<dyn RoomDirectory>,
    connect_timeout: Option<Duration>,
    continuations_tx: mpsc::UnboundedSender<Continuation>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notices_tx: broadcast::Sender<Notice>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut continuations: mpsc::UnboundedReceiver<Continuation>,
        mut events: mpsc::UnboundedReceiver<SessionEnvelope>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.controller.shutdown();
                        self.flush();
                        break;
                    };
                    if let Command::Shutdown { ack } = command {
                        self.controller.shutdown();
                        self.flush();
                        let _ = ack.send(());
                        break;
                    }
                    self.handle_command(command);
                }
                Some(continuation) = continuations.recv() => self.handle_continuation(continuation),
                Some(envelope) = events.recv() => self.controller.on_session_event(envelope),
            }
            self.flush();
        }
        info!("session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SelectRoom(room) => self.controller.select_room(room),
            Command::RequestEdit => self.controller.request_edit(),
            Command::Save => self.controller.save(),
            Command::Edit { edit, reply } => {
                let _ = reply.send(self.controller.edit(&edit));
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_continuation(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::View { token, room, allowed } => {
                self.controller.on_view_resolved(token, room, allowed)
            }
            Continuation::Edit { token, room, allowed } => {
                self.controller.on_edit_resolved(token, room, allowed)
            }
            Continuation::Persisted { room, result } => self.controller.on_persisted(room, result),
            Continuation::ConnectDeadline { token } => self.controller.on_connect_deadline(token),
        }
    }

    /// Run pending effects, broadcast notices and publish the snapshot.
    fn flush(&mut self) {
        for effect in self.controller.take_effects() {
            self.spawn_effect(effect);
        }
        for notice in self.controller.take_notices() {
            debug!(?notice, "notice raised");
            // No subscribers is fine: notices are advisory.
            let _ = self.notices_tx.send(notice);
        }
        let snapshot = self.controller.snapshot();
        self.snapshot_tx.send_if_modified(|published| {
            if *published == *snapshot {
                return false;
            }
            *published = snapshot.clone();
            true
        });
    }

    fn spawn_effect(&self, effect: Effect) {
        let continuations = self.continuations_tx.clone();
        match effect {
            Effect::CheckView { token, room } => {
                let gate = self.gate.clone();
                tokio::spawn(async move {
                    let allowed = gate.allows(Access::View, &room).await;
                    let _ = continuations.send(Continuation::View { token, room, allowed });
                });
            }
            Effect::CheckEdit { token, room } => {
                let gate = self.gate.clone();
                tokio::spawn(async move {
                    let allowed = gate.allows(Access::Edit, &room).await;
                    let _ = continuations.send(Continuation::Edit { token, room, allowed });
                });
            }
            Effect::Persist { room, content } => {
                let directory = Arc::clone(&self.directory);
                tokio::spawn(async move {
                    let result = directory
                        .update_content(&room, &content)
                        .await
                        .map_err(|error| error.to_string());
                    let _ = continuations.send(Continuation::Persisted { room, result });
                });
            }
            Effect::ConnectDeadline { token } => {
                let Some(limit) = self.connect_timeout else {
                    return;
                };
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    let _ = continuations.send(Continuation::ConnectDeadline { token });
                });
            }
        }
    }
}
