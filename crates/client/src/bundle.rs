// Collaboration bundle: every resource that exists while one room is attached.
//
// A bundle owns the shared document, the y-sync state, the network session
// and the buffer binding. It is driven entirely from the runtime task: the
// session reports transport events, the bundle runs the protocol and tells
// the controller what changed.

use mdroom_common::types::{ConnectionStatus, RoomId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::binding::{BindingError, BufferBinding};
use crate::engine::buffer::{BufferError, BufferHandle};
use crate::engine::presence::{PresencePeer, PresenceState};
use crate::engine::sync::DocSync;
use crate::engine::ydoc::{SharedDoc, TextEdit};
use crate::resource::{dispose_in_order, Disposable};
use crate::session::{EventSink, NetworkSession, SessionError, SessionEvent, SessionProvider, SessionRequest};
use crate::token::SwitchToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
    TornDown,
}

impl BundleState {
    pub fn connection_status(self) -> ConnectionStatus {
        match self {
            Self::Uninitialized | Self::TornDown => ConnectionStatus::None,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected => ConnectionStatus::Connected,
            Self::Disconnected => ConnectionStatus::Disconnected,
        }
    }
}

/// Changes the controller has to fold into the published snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEvent {
    Status(ConnectionStatus),
    PeersChanged(usize),
    TextChanged(String),
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to prepare presence state: {0}")]
    Presence(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct AttachRequest {
    pub room: RoomId,
    pub token: SwitchToken,
    pub endpoint: String,
    pub buffer: BufferHandle,
    pub presence: PresenceState,
    pub events: EventSink,
}

pub struct CollaborationBundle {
    room: RoomId,
    token: SwitchToken,
    state: BundleState,
    doc: SharedDoc,
    sync: DocSync,
    session: Box<dyn NetworkSession>,
    binding: BufferBinding,
    seeded: bool,
    ever_connected: bool,
    peer_count: usize,
}

impl CollaborationBundle {
    /// Build doc, sync state, binding and session. If any step fails, every
    /// resource built so far is released before the error is returned.
    pub fn attach(
        provider: &dyn SessionProvider,
        request: AttachRequest,
    ) -> Result<Self, AttachError> {
        let AttachRequest { room, token, endpoint, buffer, presence, events } = request;
        let mut doc = SharedDoc::new();

        let mut sync = match DocSync::new(&doc, &presence) {
            Ok(sync) => sync,
            Err(error) => {
                dispose_in_order(&room, &mut [&mut doc]);
                return Err(AttachError::Presence(format!("{error:#}")));
            }
        };

        // Writability is decided by an explicit edit request, never by attach.
        if let Err(error) = buffer.set_read_only(true) {
            dispose_in_order(&room, &mut [&mut sync, &mut doc]);
            return Err(error.into());
        }
        let mut binding = BufferBinding::bind(buffer);

        let session =
            match provider.open(SessionRequest { room: room.clone(), endpoint, events }) {
                Ok(session) => session,
                Err(error) => {
                    dispose_in_order(&room, &mut [&mut binding, &mut sync, &mut doc]);
                    return Err(error.into());
                }
            };

        let peer_count = sync.peer_count();
        debug!(room = %room, token = %token, "collaboration bundle attached");
        Ok(Self {
            room,
            token,
            state: BundleState::Connecting,
            doc,
            sync,
            session,
            binding,
            seeded: false,
            ever_connected: false,
            peer_count,
        })
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn token(&self) -> SwitchToken {
        self.token
    }

    pub fn state(&self) -> BundleState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.connection_status()
    }

    pub fn has_connected(&self) -> bool {
        self.ever_connected
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    pub fn peers(&self) -> Vec<PresencePeer> {
        self.sync.peers()
    }

    pub fn buffer(&self) -> &BufferHandle {
        self.binding.buffer()
    }

    /// Shared text once synced, otherwise the buffer content.
    pub fn text(&self) -> String {
        if self.doc.is_destroyed() || !self.ever_connected {
            self.binding.buffer().content()
        } else {
            self.doc.text()
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<BundleEvent> {
        if self.state == BundleState::TornDown {
            return Vec::new();
        }
        match event {
            SessionEvent::Open => {
                self.on_open();
                Vec::new()
            }
            SessionEvent::Frame(payload) => self.on_frame(&payload),
            SessionEvent::Closed { reason } => self.on_closed(&reason),
        }
    }

    fn on_open(&mut self) {
        match self.sync.handshake() {
            Ok(frames) => {
                for frame in frames {
                    self.send(frame);
                }
            }
            Err(error) => warn!(room = %self.room, ?error, "failed to encode sync handshake"),
        }
    }

    fn on_frame(&mut self, payload: &[u8]) -> Vec<BundleEvent> {
        let outcome = match self.sync.handle_frame(&self.doc, payload) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(room = %self.room, ?error, "dropping undecodable collaboration frame");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for reply in outcome.replies {
            self.send(reply);
        }

        let mut text_touched = outcome.doc_changed;
        if outcome.synced_now {
            text_touched |= self.seed_once();
            if self.state != BundleState::Connected {
                self.state = BundleState::Connected;
                self.ever_connected = true;
                info!(room = %self.room, "collaboration session synced");
                events.push(BundleEvent::Status(ConnectionStatus::Connected));
            }
        }

        if text_touched {
            match self.binding.refresh(&self.doc) {
                Ok(Some(text)) => events.push(BundleEvent::TextChanged(text)),
                Ok(None) => {}
                Err(error) => warn!(room = %self.room, %error, "failed to refresh buffer"),
            }
        }

        if outcome.presence_changed {
            let count = self.sync.peer_count();
            if count != self.peer_count {
                self.peer_count = count;
                events.push(BundleEvent::PeersChanged(count));
            }
        }
        events
    }

    /// First writer seeds an empty shared text from the cached buffer, at
    /// most once per bundle.
    fn seed_once(&mut self) -> bool {
        if self.seeded {
            return false;
        }
        self.seeded = true;
        let content = self.binding.buffer().content();
        let Some(update) = self.doc.seed_if_empty(&content) else {
            return false;
        };
        debug!(room = %self.room, bytes = content.len(), "seeded empty shared text");
        self.send(DocSync::encode_update(update));
        true
    }

    fn on_closed(&mut self, reason: &str) -> Vec<BundleEvent> {
        self.sync.reset();
        match self.state {
            BundleState::Connecting | BundleState::Connected => {
                debug!(room = %self.room, reason, "collaboration session dropped");
                self.state = BundleState::Disconnected;
                vec![BundleEvent::Status(ConnectionStatus::Disconnected)]
            }
            _ => Vec::new(),
        }
    }

    /// Apply a user edit and broadcast it. Returns the new text.
    pub fn apply_local_edit(&mut self, edit: &TextEdit) -> Result<String, BindingError> {
        let update = self.binding.apply_local_edit(&self.doc, edit)?;
        self.send(DocSync::encode_update(update));
        Ok(self.binding.buffer().content())
    }

    pub fn set_editable(&self, editable: bool) -> Result<(), BufferError> {
        let buffer = self.binding.buffer();
        buffer.set_read_only(!editable)?;
        if editable {
            buffer.focus()?;
        }
        Ok(())
    }

    fn send(&self, frame: Vec<u8>) {
        // Offline frames are dropped; the next handshake exchanges the difference.
        if let Err(error) = self.session.send(frame) {
            debug!(room = %self.room, %error, "collaboration frame not sent");
        }
    }

    /// Release everything in order: binding, session, sync state, document.
    /// Idempotent. Returns the number of steps that failed.
    pub fn teardown(&mut self) -> usize {
        if self.state == BundleState::TornDown {
            return 0;
        }
        if let Some(frame) = self.sync.leave_frame() {
            self.send(frame);
        }
        let failures = dispose_in_order(
            &self.room,
            &mut [&mut self.binding, &mut self.session, &mut self.sync, &mut self.doc],
        );
        self.state = BundleState::TornDown;
        self.peer_count = 0;
        debug!(room = %self.room, token = %self.token, failures, "collaboration bundle torn down");
        failures
    }
}

impl Drop for CollaborationBundle {
    fn drop(&mut self) {
        self.teardown();
    }
}
