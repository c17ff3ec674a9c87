// In-process session provider.
//
// Sessions opened here never touch the network: outbound frames are
// recorded and the owner of a probe injects inbound events by hand.
// Used by the controller and runtime tests and for offline runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mdroom_common::types::RoomId;

use super::{EventSink, NetworkSession, SessionError, SessionEvent, SessionProvider, SessionRequest};
use crate::resource::{DisposeError, Disposable};
use crate::token::SwitchToken;

#[derive(Default)]
struct MemoryState {
    opened: Vec<MemorySessionProbe>,
    failing: HashSet<RoomId>,
}

#[derive(Clone, Default)]
pub struct MemorySessionProvider {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `open` for `room` fail.
    pub fn fail_room(&self, room: RoomId) {
        self.lock().failing.insert(room);
    }

    pub fn opened(&self) -> Vec<MemorySessionProbe> {
        self.lock().opened.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened.len()
    }

    pub fn last_opened(&self) -> Option<MemorySessionProbe> {
        self.lock().opened.last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionProvider for MemorySessionProvider {
    fn open(&self, request: SessionRequest) -> Result<Box<dyn NetworkSession>, SessionError> {
        let mut state = self.lock();
        if state.failing.contains(&request.room) {
            return Err(SessionError::InvalidEndpoint {
                endpoint: request.endpoint,
                reason: "refused by memory provider".to_string(),
            });
        }

        let probe = MemorySessionProbe {
            room: request.room.clone(),
            endpoint: request.endpoint,
            events: request.events,
            sent: Arc::new(Mutex::new(Vec::new())),
            disposed: Arc::new(AtomicBool::new(false)),
        };
        state.opened.push(probe.clone());

        Ok(Box::new(MemorySession {
            room: request.room,
            sent: Arc::clone(&probe.sent),
            disposed: Arc::clone(&probe.disposed),
        }))
    }
}

/// Test-side view of one opened session.
#[derive(Clone)]
pub struct MemorySessionProbe {
    pub room: RoomId,
    pub endpoint: String,
    events: EventSink,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    disposed: Arc<AtomicBool>,
}

impl MemorySessionProbe {
    pub fn token(&self) -> SwitchToken {
        self.events.token()
    }

    /// Deliver an event as if it came from the transport.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.events.emit(event)
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct MemorySession {
    room: RoomId,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    disposed: Arc<AtomicBool>,
}

impl NetworkSession for MemorySession {
    fn room(&self) -> &RoomId {
        &self.room
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed(self.room.clone()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(frame);
        Ok(())
    }
}

impl Disposable for MemorySession {
    fn resource_name(&self) -> &'static str {
        "network_session"
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
