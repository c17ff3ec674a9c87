// Room switch controller.
//
// A synchronous state machine with no I/O of its own. Intents and resolved
// continuations go in; `Effect`s (work for the runtime to run) and
// `Notice`s (things to tell the user) come out. Every continuation carries
// the `SwitchToken` that was current when it was requested, and a result
// whose token is no longer current is dropped on arrival.

use std::sync::Arc;
use std::time::Duration;

use mdroom_common::protocol::collab::room_endpoint;
use mdroom_common::types::{ConnectionStatus, RoomId, UserContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bundle::{AttachRequest, BundleEvent, CollaborationBundle};
use crate::engine::binding::BindingError;
use crate::engine::buffer_cache::BufferCache;
use crate::engine::presence::PresenceState;
use crate::engine::ydoc::TextEdit;
use crate::session::{EventSink, SessionEnvelope, SessionProvider};
use crate::token::SwitchToken;

// ── Outputs ────────────────────────────────────────────────────────

/// Work the runtime performs on the controller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CheckView { token: SwitchToken, room: RoomId },
    CheckEdit { token: SwitchToken, room: RoomId },
    Persist { room: RoomId, content: String },
    ConnectDeadline { token: SwitchToken },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    EditDenied { room: RoomId },
    Saved { room: RoomId },
    SaveFailed { room: RoomId, reason: String },
    AttachFailed { room: RoomId, reason: String },
}

/// State exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub selected_room: Option<RoomId>,
    pub active_room: Option<RoomId>,
    pub connection_status: ConnectionStatus,
    pub peer_count: usize,
    /// Display names of peers with a recognised presence record.
    pub peers: Vec<String>,
    pub has_access: bool,
    pub editing_enabled: bool,
    pub preview_text: String,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            selected_room: None,
            active_room: None,
            connection_status: ConnectionStatus::None,
            peer_count: 0,
            peers: Vec::new(),
            has_access: true,
            editing_enabled: false,
            preview_text: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("no room is attached")]
    NoActiveRoom,
    #[error("editing is not enabled for room `{0}`")]
    NotEditable(RoomId),
    #[error("room `{0}` has not finished its first sync")]
    NotSynced(RoomId),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

// ── Settings ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub collab_url: String,
    pub cache_capacity: usize,
    pub default_content: String,
    /// `None` disables the connect deadline.
    pub connect_timeout: Option<Duration>,
}

// ── Controller ─────────────────────────────────────────────────────

pub struct RoomController {
    user: UserContext,
    settings: ControllerSettings,
    sessions: Arc<dyn SessionProvider>,
    events_tx: mpsc::UnboundedSender<SessionEnvelope>,
    cache: BufferCache,
    current: SwitchToken,
    bundle: Option<CollaborationBundle>,
    snapshot: SessionSnapshot,
    effects: Vec<Effect>,
    notices: Vec<Notice>,
}

impl RoomController {
    pub fn new(
        user: UserContext,
        settings: ControllerSettings,
        sessions: Arc<dyn SessionProvider>,
        events_tx: mpsc::UnboundedSender<SessionEnvelope>,
    ) -> Self {
        let cache = BufferCache::new(settings.cache_capacity, settings.default_content.clone());
        Self {
            user,
            settings,
            sessions,
            events_tx,
            cache,
            current: SwitchToken::INITIAL,
            bundle: None,
            snapshot: SessionSnapshot::default(),
            effects: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn current_token(&self) -> SwitchToken {
        self.current
    }

    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub fn active_bundle(&self) -> Option<&CollaborationBundle> {
        self.bundle.as_ref()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ── Intents ────────────────────────────────────────────────────

    pub fn select_room(&mut self, room: Option<RoomId>) {
        if let (Some(requested), Some(bundle)) = (room.as_ref(), self.bundle.as_ref()) {
            if bundle.room() == requested {
                debug!(room = %requested, "room already attached");
                return;
            }
        }

        self.current = self.current.next();
        let token = self.current;
        self.teardown_bundle();

        let Some(room) = room else {
            info!(token = %token, "room deselected");
            self.snapshot = SessionSnapshot::default();
            return;
        };

        info!(room = %room, token = %token, "switching room");
        self.snapshot.selected_room = Some(room.clone());
        self.snapshot.connection_status = ConnectionStatus::Connecting;
        self.snapshot.preview_text.clear();
        self.effects.push(Effect::CheckView { token, room });
    }

    pub fn request_edit(&mut self) {
        let Some(bundle) = self.bundle.as_ref() else {
            debug!("edit requested without an attached room");
            return;
        };
        if self.snapshot.editing_enabled {
            return;
        }
        self.effects.push(Effect::CheckEdit { token: self.current, room: bundle.room().clone() });
    }

    pub fn save(&mut self) {
        let Some(bundle) = self.bundle.as_ref() else {
            debug!("save requested without an attached room");
            return;
        };
        self.effects.push(Effect::Persist { room: bundle.room().clone(), content: bundle.text() });
    }

    pub fn edit(&mut self, edit: &TextEdit) -> Result<(), EditError> {
        let Some(bundle) = self.bundle.as_mut() else {
            return Err(EditError::NoActiveRoom);
        };
        if !self.snapshot.editing_enabled {
            return Err(EditError::NotEditable(bundle.room().clone()));
        }
        // The first sync seeds an empty shared text from the buffer.
        if !bundle.has_connected() {
            return Err(EditError::NotSynced(bundle.room().clone()));
        }
        if edit.is_noop() {
            return Ok(());
        }
        self.snapshot.preview_text = bundle.apply_local_edit(edit)?;
        Ok(())
    }

    /// Release every room resource. Outstanding continuations become stale.
    pub fn shutdown(&mut self) {
        self.current = self.current.next();
        self.teardown_bundle();
        self.cache.dispose_all();
        self.snapshot = SessionSnapshot::default();
        info!("room controller shut down");
    }

    // ── Continuations ──────────────────────────────────────────────

    pub fn on_view_resolved(&mut self, token: SwitchToken, room: RoomId, allowed: bool) {
        if token != self.current {
            debug!(room = %room, token = %token, current = %self.current, "stale view permission discarded");
            return;
        }

        if !allowed {
            info!(room = %room, "view permission denied");
            self.snapshot.has_access = false;
            self.snapshot.connection_status = ConnectionStatus::Disconnected;
            return;
        }
        self.snapshot.has_access = true;

        let buffer = self.cache.get(&room);
        let request = AttachRequest {
            room: room.clone(),
            token,
            endpoint: room_endpoint(&self.settings.collab_url, &room),
            buffer: buffer.clone(),
            presence: PresenceState::for_user(&self.user),
            events: EventSink::new(token, room.clone(), self.events_tx.clone()),
        };

        match CollaborationBundle::attach(self.sessions.as_ref(), request) {
            Ok(bundle) => {
                self.snapshot.active_room = Some(room);
                self.snapshot.connection_status = bundle.status();
                self.snapshot.peer_count = bundle.peer_count();
                self.snapshot.peers = peer_names(&bundle);
                self.snapshot.editing_enabled = false;
                self.snapshot.preview_text = buffer.content();
                self.bundle = Some(bundle);
                if self.settings.connect_timeout.is_some() {
                    self.effects.push(Effect::ConnectDeadline { token });
                }
            }
            Err(error) => {
                warn!(room = %room, %error, "failed to attach room");
                self.snapshot.connection_status = ConnectionStatus::Disconnected;
                self.notices.push(Notice::AttachFailed { room, reason: error.to_string() });
            }
        }
    }

    pub fn on_edit_resolved(&mut self, token: SwitchToken, room: RoomId, allowed: bool) {
        let Some(bundle) = self.bundle.as_ref().filter(|bundle| bundle.room() == &room) else {
            debug!(room = %room, "edit permission for inactive room discarded");
            return;
        };
        if token != self.current {
            debug!(room = %room, token = %token, "stale edit permission discarded");
            return;
        }

        if allowed {
            if let Err(error) = bundle.set_editable(true) {
                warn!(room = %room, %error, "failed to enable editing");
                return;
            }
            info!(room = %room, "editing enabled");
            self.snapshot.editing_enabled = true;
        } else {
            if let Err(error) = bundle.set_editable(false) {
                warn!(room = %room, %error, "failed to lock buffer");
            }
            self.snapshot.editing_enabled = false;
            self.notices.push(Notice::EditDenied { room });
        }
    }

    pub fn on_persisted(&mut self, room: RoomId, result: Result<(), String>) {
        match result {
            Ok(()) => {
                if let Some(buffer) = self.cache.peek(&room) {
                    buffer.mark_clean();
                }
                self.notices.push(Notice::Saved { room });
            }
            Err(reason) => {
                warn!(room = %room, %reason, "save failed");
                self.notices.push(Notice::SaveFailed { room, reason });
            }
        }
    }

    pub fn on_connect_deadline(&mut self, token: SwitchToken) {
        if token != self.current {
            return;
        }
        let Some(bundle) = self.bundle.as_ref() else {
            return;
        };
        if bundle.has_connected() {
            return;
        }
        let room = bundle.room().clone();
        warn!(room = %room, "collaboration session did not sync in time");
        self.teardown_bundle();
        self.snapshot.connection_status = ConnectionStatus::Disconnected;
        self.notices.push(Notice::AttachFailed {
            room,
            reason: "timed out waiting for the collaboration server".to_string(),
        });
    }

    pub fn on_session_event(&mut self, envelope: SessionEnvelope) {
        if envelope.token != self.current {
            debug!(room = %envelope.room, token = %envelope.token, "event from stale session dropped");
            return;
        }
        let Some(bundle) = self.bundle.as_mut().filter(|bundle| bundle.token() == envelope.token)
        else {
            return;
        };

        for event in bundle.handle_event(envelope.event) {
            match event {
                BundleEvent::Status(status) => self.snapshot.connection_status = status,
                BundleEvent::PeersChanged(count) => {
                    self.snapshot.peer_count = count;
                    self.snapshot.peers = peer_names(bundle);
                }
                BundleEvent::TextChanged(text) => self.snapshot.preview_text = text,
            }
        }
    }

    fn teardown_bundle(&mut self) {
        if let Some(mut bundle) = self.bundle.take() {
            bundle.teardown();
        }
        self.snapshot.active_room = None;
        self.snapshot.peer_count = 0;
        self.snapshot.peers.clear();
        self.snapshot.editing_enabled = false;
    }
}

fn peer_names(bundle: &CollaborationBundle) -> Vec<String> {
    bundle.peers().iter().filter_map(|peer| peer.display_name().map(str::to_owned)).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use yrs::sync::{Awareness, Message, SyncMessage};
    use yrs::updates::encoder::Encode;
    use yrs::{Doc, Options, ReadTxn, StateVector, Transact};

    use super::*;
    use crate::session::memory::MemorySessionProvider;
    use crate::session::SessionEvent;

    struct Harness {
        controller: RoomController,
        provider: MemorySessionProvider,
        events: mpsc::UnboundedReceiver<SessionEnvelope>,
    }

    fn harness(capacity: usize) -> Harness {
        let provider = MemorySessionProvider::new();
        let (tx, events) = mpsc::unbounded_channel();
        let controller = RoomController::new(
            UserContext {
                user_id: "7".into(),
                client_id: "uid-test".into(),
                display_name: "Tester".into(),
            },
            ControllerSettings {
                collab_url: "ws://localhost:1234".into(),
                cache_capacity: capacity,
                default_content: "# New document\n".into(),
                connect_timeout: Some(Duration::from_secs(10)),
            },
            Arc::new(provider.clone()),
            tx,
        );
        Harness { controller, provider, events }
    }

    fn room(id: &str) -> RoomId {
        id.parse().expect("room id should parse")
    }

    fn view_check(effects: &[Effect]) -> (SwitchToken, RoomId) {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::CheckView { token, room } => Some((*token, room.clone())),
                _ => None,
            })
            .expect("a view check should be requested")
    }

    fn attach(h: &mut Harness, id: &str) -> SwitchToken {
        h.controller.select_room(Some(room(id)));
        let (token, requested) = view_check(&h.controller.take_effects());
        h.controller.on_view_resolved(token, requested, true);
        token
    }

    fn deliver_sync(h: &mut Harness) {
        let probe = h.provider.last_opened().expect("a session should be open");
        let update = Doc::new().transact().encode_state_as_update_v1(&StateVector::default());
        probe.emit(SessionEvent::Frame(Message::Sync(SyncMessage::SyncStep2(update)).encode_v1()));
        while let Ok(envelope) = h.events.try_recv() {
            h.controller.on_session_event(envelope);
        }
    }

    #[test]
    fn granted_selection_publishes_bundle_read_only() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");

        let snapshot = h.controller.snapshot().clone();
        assert_eq!(snapshot.active_room, Some(room("r1")));
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connecting);
        assert!(snapshot.has_access);
        assert!(!snapshot.editing_enabled);
        assert_eq!(snapshot.preview_text, "# New document\n");
        assert_eq!(h.controller.take_effects(), vec![Effect::ConnectDeadline { token }]);
        assert!(h.controller.active_bundle().unwrap().buffer().is_read_only());

        let probe = h.provider.last_opened().unwrap();
        assert_eq!(probe.endpoint, "ws://localhost:1234/r1");

        deliver_sync(&mut h);
        assert_eq!(h.controller.snapshot().connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn stale_view_result_is_discarded() {
        let mut h = harness(50);
        h.controller.select_room(Some(room("a")));
        let (token_a, _) = view_check(&h.controller.take_effects());
        h.controller.select_room(Some(room("b")));
        let (token_b, _) = view_check(&h.controller.take_effects());

        h.controller.on_view_resolved(token_a, room("a"), true);
        assert!(h.controller.active_bundle().is_none());
        assert_eq!(h.provider.open_count(), 0);
        assert!(!h.controller.cache().contains(&room("a")));

        h.controller.on_view_resolved(token_b, room("b"), true);
        assert_eq!(h.controller.snapshot().active_room, Some(room("b")));
        assert_eq!(h.provider.open_count(), 1);
    }

    #[test]
    fn denied_view_leaves_no_bundle() {
        let mut h = harness(50);
        h.controller.select_room(Some(room("secret")));
        let (token, requested) = view_check(&h.controller.take_effects());
        h.controller.on_view_resolved(token, requested, false);

        let snapshot = h.controller.snapshot();
        assert!(!snapshot.has_access);
        assert_eq!(snapshot.connection_status, ConnectionStatus::Disconnected);
        assert!(h.controller.active_bundle().is_none());
        assert_eq!(h.provider.open_count(), 0);
    }

    #[test]
    fn denied_then_granted_recovers_access() {
        let mut h = harness(50);
        h.controller.select_room(Some(room("r1")));
        let (token, requested) = view_check(&h.controller.take_effects());
        h.controller.on_view_resolved(token, requested, false);

        attach(&mut h, "r2");
        let snapshot = h.controller.snapshot();
        assert!(snapshot.has_access);
        assert_eq!(snapshot.active_room, Some(room("r2")));
        assert!(!h.controller.cache().contains(&room("r1")));
    }

    #[test]
    fn reselecting_active_room_is_a_noop() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");
        h.controller.take_effects();

        h.controller.select_room(Some(room("r1")));
        assert_eq!(h.controller.current_token(), token);
        assert!(h.controller.take_effects().is_empty());
        assert!(!h.provider.last_opened().unwrap().is_disposed());
    }

    #[test]
    fn deselect_tears_down_and_resets() {
        let mut h = harness(50);
        attach(&mut h, "r1");
        h.controller.select_room(None);

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.connection_status, ConnectionStatus::None);
        assert_eq!(snapshot.peer_count, 0);
        assert!(snapshot.has_access);
        assert!(!snapshot.editing_enabled);
        assert!(h.provider.last_opened().unwrap().is_disposed());
        // Buffer stays cached for the next visit.
        assert!(h.controller.cache().contains(&room("r1")));
    }

    #[test]
    fn switching_tears_down_previous_bundle_before_checking() {
        let mut h = harness(50);
        attach(&mut h, "r1");
        h.controller.select_room(Some(room("r2")));

        assert!(h.provider.opened()[0].is_disposed());
        assert!(h.controller.active_bundle().is_none());
        assert_eq!(h.controller.snapshot().connection_status, ConnectionStatus::Connecting);
    }

    #[test]
    fn cache_keeps_two_most_recent_rooms() {
        let mut h = harness(2);
        attach(&mut h, "r1");
        let first = h.controller.cache().peek(&room("r1")).unwrap().clone();
        attach(&mut h, "r2");
        attach(&mut h, "r3");

        assert_eq!(h.controller.cache().cached_rooms(), vec![room("r2"), room("r3")]);
        assert!(first.is_disposed());
    }

    #[test]
    fn edit_grant_and_denial() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");
        h.controller.take_effects();

        assert!(matches!(h.controller.edit(&TextEdit::insert(0, "x")), Err(EditError::NotEditable(_))));

        h.controller.request_edit();
        assert_eq!(h.controller.take_effects(), vec![Effect::CheckEdit { token, room: room("r1") }]);
        h.controller.on_edit_resolved(token, room("r1"), false);
        assert!(!h.controller.snapshot().editing_enabled);
        assert_eq!(h.controller.take_notices(), vec![Notice::EditDenied { room: room("r1") }]);

        h.controller.request_edit();
        h.controller.take_effects();
        h.controller.on_edit_resolved(token, room("r1"), true);
        assert!(h.controller.snapshot().editing_enabled);
        deliver_sync(&mut h);
        h.controller.edit(&TextEdit::insert(0, "hello ")).expect("edit should apply");
        assert_eq!(h.controller.snapshot().preview_text, "hello # New document\n");
    }

    #[test]
    fn edits_wait_for_first_sync_and_keep_buffer_content() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");
        h.controller.request_edit();
        h.controller.take_effects();
        h.controller.on_edit_resolved(token, room("r1"), true);
        assert!(h.controller.snapshot().editing_enabled);

        assert!(matches!(
            h.controller.edit(&TextEdit::insert(15, "x")),
            Err(EditError::NotSynced(_))
        ));
        assert!(matches!(
            h.controller.edit(&TextEdit::insert(0, "x")),
            Err(EditError::NotSynced(_))
        ));
        let bundle = h.controller.active_bundle().unwrap();
        assert_eq!(bundle.buffer().snapshot().content, "# New document\n");

        deliver_sync(&mut h);
        assert_eq!(h.controller.snapshot().preview_text, "# New document\n");
        h.controller.edit(&TextEdit::insert(0, "x")).expect("edit after sync should apply");
        assert_eq!(h.controller.snapshot().preview_text, "x# New document\n");
    }

    #[test]
    fn edit_result_for_previous_room_is_discarded() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");
        h.controller.request_edit();
        attach(&mut h, "r2");

        h.controller.on_edit_resolved(token, room("r1"), true);
        assert!(!h.controller.snapshot().editing_enabled);
        assert!(h.controller.active_bundle().unwrap().buffer().is_read_only());
    }

    #[test]
    fn save_persists_shared_text_and_reports() {
        let mut h = harness(50);
        attach(&mut h, "r1");
        h.controller.take_effects();

        // Before the first sync the cached buffer is the best copy.
        h.controller.save();
        assert_eq!(
            h.controller.take_effects(),
            vec![Effect::Persist { room: room("r1"), content: "# New document\n".into() }]
        );

        deliver_sync(&mut h);
        h.controller.save();
        assert_eq!(
            h.controller.take_effects(),
            vec![Effect::Persist { room: room("r1"), content: "# New document\n".into() }]
        );

        h.controller.on_persisted(room("r1"), Err("502".into()));
        h.controller.on_persisted(room("r1"), Ok(()));
        assert_eq!(
            h.controller.take_notices(),
            vec![
                Notice::SaveFailed { room: room("r1"), reason: "502".into() },
                Notice::Saved { room: room("r1") },
            ]
        );
    }

    #[test]
    fn connect_deadline_tears_down_unsynced_bundle() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");
        h.controller.on_connect_deadline(token);

        assert!(h.controller.active_bundle().is_none());
        assert_eq!(h.controller.snapshot().connection_status, ConnectionStatus::Disconnected);
        assert!(matches!(h.controller.take_notices()[..], [Notice::AttachFailed { .. }]));
    }

    #[test]
    fn connect_deadline_after_sync_is_ignored() {
        let mut h = harness(50);
        let token = attach(&mut h, "r1");
        deliver_sync(&mut h);
        h.controller.on_connect_deadline(token);

        assert!(h.controller.active_bundle().is_some());
        assert_eq!(h.controller.snapshot().connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn attach_failure_reports_and_disconnects() {
        let mut h = harness(50);
        h.provider.fail_room(room("down"));
        h.controller.select_room(Some(room("down")));
        let (token, requested) = view_check(&h.controller.take_effects());
        h.controller.on_view_resolved(token, requested, true);

        assert!(h.controller.active_bundle().is_none());
        assert_eq!(h.controller.snapshot().connection_status, ConnectionStatus::Disconnected);
        assert!(matches!(h.controller.take_notices()[..], [Notice::AttachFailed { .. }]));
    }

    #[test]
    fn presence_with_three_states_sets_peer_count() {
        let mut h = harness(50);
        attach(&mut h, "r1");
        deliver_sync(&mut h);

        let probe = h.provider.last_opened().unwrap();
        for client_id in [901, 902] {
            let awareness =
                Awareness::new(Doc::with_options(Options { client_id, ..Default::default() }));
            awareness
                .set_local_state(serde_json::json!({ "user": { "id": "x", "name": format!("peer{client_id}") } }))
                .unwrap();
            probe.emit(SessionEvent::Frame(Message::Awareness(awareness.update().unwrap()).encode_v1()));
        }
        while let Ok(envelope) = h.events.try_recv() {
            h.controller.on_session_event(envelope);
        }

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.peer_count, 3);
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
        assert!(snapshot.peers.contains(&"Tester".to_string()));
    }

    #[test]
    fn events_from_torn_down_session_are_dropped() {
        let mut h = harness(50);
        attach(&mut h, "r1");
        let old_probe = h.provider.last_opened().unwrap();
        attach(&mut h, "r2");

        old_probe.emit(SessionEvent::Closed { reason: "late".into() });
        while let Ok(envelope) = h.events.try_recv() {
            h.controller.on_session_event(envelope);
        }
        assert_eq!(h.controller.snapshot().connection_status, ConnectionStatus::Connecting);
        assert_eq!(h.controller.snapshot().active_room, Some(room("r2")));
    }

    #[test]
    fn shutdown_disposes_everything() {
        let mut h = harness(50);
        attach(&mut h, "r1");
        let buffer = h.controller.cache().peek(&room("r1")).unwrap().clone();
        h.controller.shutdown();

        assert!(buffer.is_disposed());
        assert!(h.controller.cache().is_empty());
        assert!(h.provider.last_opened().unwrap().is_disposed());
        assert_eq!(*h.controller.snapshot(), SessionSnapshot::default());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Select(Option<u8>),
        Resolve { pick: usize, allowed: bool },
        Sync,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            4 => proptest::option::weighted(0.8, 0u8..3).prop_map(Step::Select),
            4 => (any::<usize>(), proptest::bool::weighted(0.8))
                .prop_map(|(pick, allowed)| Step::Resolve { pick, allowed }),
            1 => Just(Step::Sync),
        ]
    }

    fn queue_view_checks(h: &mut Harness, pending: &mut Vec<(SwitchToken, RoomId)>) {
        for effect in h.controller.take_effects() {
            if let Effect::CheckView { token, room } = effect {
                pending.push((token, room));
            }
        }
    }

    fn resolve(
        h: &mut Harness,
        verdicts: &mut HashMap<SwitchToken, (RoomId, bool)>,
        (token, room): (SwitchToken, RoomId),
        allowed: bool,
    ) {
        verdicts.insert(token, (room.clone(), allowed));
        h.controller.on_view_resolved(token, room, allowed);
    }

    fn live_sessions(h: &Harness) -> Vec<SwitchToken> {
        h.provider.opened().iter().filter(|probe| !probe.is_disposed()).map(|probe| probe.token()).collect()
    }

    proptest! {
        #[test]
        fn any_selection_sequence_keeps_one_bundle_for_the_last_call(
            steps in proptest::collection::vec(step(), 1..40),
        ) {
            let mut h = harness(2);
            let mut pending: Vec<(SwitchToken, RoomId)> = Vec::new();
            let mut verdicts: HashMap<SwitchToken, (RoomId, bool)> = HashMap::new();

            for step in steps {
                match step {
                    Step::Select(choice) => {
                        h.controller.select_room(choice.map(|id| room(&format!("r{id}"))));
                        queue_view_checks(&mut h, &mut pending);
                    }
                    Step::Resolve { pick, allowed } if !pending.is_empty() => {
                        let check = pending.remove(pick % pending.len());
                        resolve(&mut h, &mut verdicts, check, allowed);
                    }
                    Step::Resolve { .. } => {}
                    Step::Sync => {
                        if let Some(probe) = h.provider.last_opened() {
                            let update =
                                Doc::new().transact().encode_state_as_update_v1(&StateVector::default());
                            probe.emit(SessionEvent::Frame(
                                Message::Sync(SyncMessage::SyncStep2(update)).encode_v1(),
                            ));
                        }
                        while let Ok(envelope) = h.events.try_recv() {
                            h.controller.on_session_event(envelope);
                        }
                    }
                }

                let live = live_sessions(&h);
                prop_assert!(live.len() <= 1, "live sessions: {:?}", live);
                if let Some(token) = live.first() {
                    prop_assert_eq!(*token, h.controller.current_token());
                }
            }

            // Settle: every outstanding check comes back granted.
            for check in std::mem::take(&mut pending) {
                resolve(&mut h, &mut verdicts, check, true);
            }

            let live = live_sessions(&h);
            prop_assert!(live.len() <= 1);
            let expected = match verdicts.get(&h.controller.current_token()) {
                Some((room, true)) => Some(room.clone()),
                _ => None,
            };
            prop_assert_eq!(h.controller.snapshot().active_room.clone(), expected.clone());
            prop_assert_eq!(live.len(), usize::from(expected.is_some()));
        }
    }
}
