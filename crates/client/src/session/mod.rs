// Network sessions: the transport half of a collaboration bundle.
//
// A session only moves bytes. It reports its lifecycle and every inbound
// frame through an `EventSink`; protocol handling happens in the bundle on
// the runtime task. Sessions are abstracted via `SessionProvider` so the
// controller can be driven without sockets in tests.

pub mod memory;
pub mod ws;

use mdroom_common::types::RoomId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::resource::Disposable;
use crate::token::SwitchToken;

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport connected; the protocol handshake may start.
    Open,
    /// One binary frame from the collaboration endpoint.
    Frame(Vec<u8>),
    /// Transport lost. The session keeps retrying until disposed.
    Closed { reason: String },
}

/// A session event tagged with the selection that opened the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnvelope {
    pub token: SwitchToken,
    pub room: RoomId,
    pub event: SessionEvent,
}

/// Sending half handed to a session; every event it emits carries the
/// token of the selection it belongs to.
#[derive(Debug, Clone)]
pub struct EventSink {
    token: SwitchToken,
    room: RoomId,
    tx: mpsc::UnboundedSender<SessionEnvelope>,
}

impl EventSink {
    pub fn new(token: SwitchToken, room: RoomId, tx: mpsc::UnboundedSender<SessionEnvelope>) -> Self {
        Self { token, room, tx }
    }

    pub fn token(&self) -> SwitchToken {
        self.token
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Returns `false` once nobody is listening any more.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(SessionEnvelope { token: self.token, room: self.room.clone(), event })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Provider seam ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct SessionRequest {
    pub room: RoomId,
    /// Fully-qualified collaboration endpoint for the room.
    pub endpoint: String,
    pub events: EventSink,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid collaboration endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("no async runtime available to drive the session for room `{0}`")]
    NoRuntime(RoomId),
    #[error("session for room `{0}` is closed")]
    Closed(RoomId),
}

/// Opens the network session for one room.
pub trait SessionProvider: Send + Sync {
    fn open(&self, request: SessionRequest) -> Result<Box<dyn NetworkSession>, SessionError>;
}

/// A live session. Dropping or disposing it stops reconnection.
pub trait NetworkSession: Disposable + Send {
    fn room(&self) -> &RoomId;

    /// Queue one binary frame for the collaboration endpoint.
    fn send(&self, frame: Vec<u8>) -> Result<(), SessionError>;
}

impl Disposable for Box<dyn NetworkSession> {
    fn resource_name(&self) -> &'static str {
        (**self).resource_name()
    }

    fn dispose(&mut self) -> Result<(), crate::resource::DisposeError> {
        (**self).dispose()
    }
}
