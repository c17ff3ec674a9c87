// y-sync protocol state for one attached room.
//
// Frames arrive from the network session as raw bytes; this module decodes
// them, applies document and awareness updates, and produces the replies.
// It never touches the transport itself.

use anyhow::{Context, Result};
use tracing::debug;
use yrs::encoding::read::Cursor;
use yrs::sync::{Awareness, DefaultProtocol, Message, MessageReader, Protocol, SyncMessage};
use yrs::updates::decoder::DecoderV1;
use yrs::updates::encoder::Encode;
use yrs::ReadTxn;
use yrs::Transact;

use crate::engine::presence::{self, PresencePeer, PresenceState};
use crate::engine::ydoc::SharedDoc;
use crate::resource::{DisposeError, Disposable};

/// What a single inbound frame did to local state.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Encoded messages to send back on the same session.
    pub replies: Vec<Vec<u8>>,
    pub doc_changed: bool,
    pub presence_changed: bool,
    /// True only for the frame that completed the initial handshake.
    pub synced_now: bool,
}

pub struct DocSync {
    awareness: Awareness,
    protocol: DefaultProtocol,
    synced: bool,
    disposed: bool,
}

impl DocSync {
    /// Attach protocol state to `doc` and publish the local presence.
    pub fn new(doc: &SharedDoc, presence: &PresenceState) -> Result<Self> {
        let awareness = Awareness::new(doc.inner().clone());
        awareness.set_local_state(presence).context("failed to encode local presence state")?;
        Ok(Self { awareness, protocol: DefaultProtocol, synced: false, disposed: false })
    }

    /// Frames to send whenever the session (re)opens: our state vector and
    /// our presence.
    pub fn handshake(&self) -> Result<Vec<Vec<u8>>> {
        let state_vector = self.awareness.doc().transact().state_vector();
        let step1 = Message::Sync(SyncMessage::SyncStep1(state_vector)).encode_v1();
        let presence = self.awareness.update().context("failed to encode awareness state")?;
        Ok(vec![step1, Message::Awareness(presence).encode_v1()])
    }

    pub fn handle_frame(&mut self, doc: &SharedDoc, payload: &[u8]) -> Result<FrameOutcome> {
        let mut outcome = FrameOutcome::default();
        let mut decoder = DecoderV1::new(Cursor::new(payload));
        let mut reader = MessageReader::new(&mut decoder);

        while let Some(next_message) = reader.next() {
            match next_message.context("failed to decode y-sync message")? {
                Message::Sync(SyncMessage::SyncStep1(state_vector)) => {
                    if let Some(reply) = self
                        .protocol
                        .handle_sync_step1(&self.awareness, state_vector)
                        .context("failed to answer sync step 1")?
                    {
                        outcome.replies.push(reply.encode_v1());
                    }
                }
                Message::Sync(SyncMessage::SyncStep2(update)) => {
                    doc.apply_remote_update(&update).context("failed to apply sync step 2")?;
                    outcome.doc_changed = true;
                    if !self.synced {
                        self.synced = true;
                        outcome.synced_now = true;
                    }
                }
                Message::Sync(SyncMessage::Update(update)) => {
                    doc.apply_remote_update(&update).context("failed to apply remote update")?;
                    outcome.doc_changed = true;
                }
                Message::Awareness(update) => {
                    let summary = self
                        .awareness
                        .apply_update_summary(update)
                        .context("failed to apply awareness update")?;
                    if summary.is_some_and(|summary| !summary.all_changes().is_empty()) {
                        outcome.presence_changed = true;
                    }
                }
                Message::AwarenessQuery => {
                    let update =
                        self.awareness.update().context("failed to encode awareness state")?;
                    outcome.replies.push(Message::Awareness(update).encode_v1());
                }
                Message::Auth(reason) => {
                    debug!(?reason, "collaboration endpoint sent auth message");
                }
                other => {
                    debug!(?other, "ignoring unsupported y-sync message");
                }
            }
        }

        Ok(outcome)
    }

    /// Wrap a locally produced document update for the wire.
    pub fn encode_update(update: Vec<u8>) -> Vec<u8> {
        Message::Sync(SyncMessage::Update(update)).encode_v1()
    }

    /// Forget handshake progress after the session dropped; the next
    /// sync step 2 counts as a fresh sync.
    pub fn reset(&mut self) {
        self.synced = false;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn peer_count(&self) -> usize {
        presence::peer_count(&self.awareness)
    }

    pub fn peers(&self) -> Vec<PresencePeer> {
        presence::list_peers(&self.awareness)
    }

    /// Clear the local presence and encode the removal so peers drop us
    /// immediately instead of waiting for the awareness timeout.
    pub fn leave_frame(&mut self) -> Option<Vec<u8>> {
        if self.disposed {
            return None;
        }
        self.awareness.clean_local_state();
        // `update()` skips cleared states, so name the local client explicitly.
        let client_id = self.awareness.doc().client_id();
        self.awareness
            .update_with_clients([client_id])
            .ok()
            .map(|update| Message::Awareness(update).encode_v1())
    }
}

impl Disposable for DocSync {
    fn resource_name(&self) -> &'static str {
        "doc_sync"
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        if !self.disposed {
            self.awareness.clean_local_state();
            self.synced = false;
            self.disposed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mdroom_common::crdt::origin::TxnOrigin;

    use super::*;
    use crate::engine::presence::PresenceUser;
    use crate::engine::ydoc::TextEdit;

    fn presence(name: &str) -> PresenceState {
        PresenceState { user: PresenceUser { id: format!("uid-{name}"), name: name.into(), color: None } }
    }

    fn deliver(
        to: &mut DocSync,
        to_doc: &SharedDoc,
        frames: Vec<Vec<u8>>,
    ) -> Vec<FrameOutcome> {
        frames
            .iter()
            .map(|frame| to.handle_frame(to_doc, frame).expect("frame should apply"))
            .collect()
    }

    #[test]
    fn handshake_between_two_peers_converges() {
        let doc_a = SharedDoc::with_client_id(1);
        let doc_b = SharedDoc::with_client_id(2);
        doc_b.apply_edit(&TextEdit::insert(0, "from b"), TxnOrigin::LocalEdit).unwrap();

        let mut sync_a = DocSync::new(&doc_a, &presence("a")).unwrap();
        let mut sync_b = DocSync::new(&doc_b, &presence("b")).unwrap();

        // a -> b: step1 + awareness. b answers step1 with step2.
        let outcomes_b = deliver(&mut sync_b, &doc_b, sync_a.handshake().unwrap());
        let replies_from_b: Vec<Vec<u8>> =
            outcomes_b.into_iter().flat_map(|outcome| outcome.replies).collect();
        assert_eq!(replies_from_b.len(), 1);
        assert_eq!(sync_b.peer_count(), 2);

        let outcomes_a = deliver(&mut sync_a, &doc_a, replies_from_b);
        assert!(outcomes_a[0].synced_now);
        assert!(outcomes_a[0].doc_changed);
        assert!(sync_a.is_synced());
        assert_eq!(doc_a.text(), "from b");
    }

    #[test]
    fn second_step2_does_not_report_sync_again() {
        let doc_a = SharedDoc::with_client_id(1);
        let doc_b = SharedDoc::with_client_id(2);
        let mut sync_a = DocSync::new(&doc_a, &presence("a")).unwrap();
        let mut sync_b = DocSync::new(&doc_b, &presence("b")).unwrap();

        for expected in [true, false] {
            let replies: Vec<Vec<u8>> = deliver(&mut sync_b, &doc_b, sync_a.handshake().unwrap())
                .into_iter()
                .flat_map(|outcome| outcome.replies)
                .collect();
            let outcomes = deliver(&mut sync_a, &doc_a, replies);
            assert_eq!(outcomes[0].synced_now, expected);
        }

        sync_a.reset();
        let replies: Vec<Vec<u8>> = deliver(&mut sync_b, &doc_b, sync_a.handshake().unwrap())
            .into_iter()
            .flat_map(|outcome| outcome.replies)
            .collect();
        assert!(deliver(&mut sync_a, &doc_a, replies)[0].synced_now);
    }

    #[test]
    fn incremental_update_and_presence_are_reported() {
        let doc_a = SharedDoc::with_client_id(1);
        let doc_b = SharedDoc::with_client_id(2);
        let mut sync_a = DocSync::new(&doc_a, &presence("a")).unwrap();
        let sync_b = DocSync::new(&doc_b, &presence("b")).unwrap();

        let update = doc_b.apply_edit(&TextEdit::insert(0, "hi"), TxnOrigin::LocalEdit).unwrap();
        let outcome =
            sync_a.handle_frame(&doc_a, &DocSync::encode_update(update)).expect("update applies");
        assert!(outcome.doc_changed);
        assert!(!outcome.synced_now);
        assert_eq!(doc_a.text(), "hi");

        let presence_frame = sync_b.handshake().unwrap().pop().unwrap();
        let outcome = sync_a.handle_frame(&doc_a, &presence_frame).expect("awareness applies");
        assert!(outcome.presence_changed);
        assert_eq!(sync_a.peer_count(), 2);
        let names: Vec<_> =
            sync_a.peers().iter().filter_map(|peer| peer.display_name().map(str::to_owned)).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn leave_frame_removes_peer_remotely() {
        let doc_a = SharedDoc::with_client_id(1);
        let doc_b = SharedDoc::with_client_id(2);
        let mut sync_a = DocSync::new(&doc_a, &presence("a")).unwrap();
        let mut sync_b = DocSync::new(&doc_b, &presence("b")).unwrap();

        deliver(&mut sync_a, &doc_a, sync_b.handshake().unwrap());
        assert_eq!(sync_a.peer_count(), 2);

        let leave = sync_b.leave_frame().expect("leave frame should encode");
        sync_a.handle_frame(&doc_a, &leave).expect("leave applies");
        assert_eq!(sync_a.peer_count(), 1);

        sync_b.dispose().unwrap();
        assert!(sync_b.leave_frame().is_none());
    }

    #[test]
    fn corrupt_update_is_an_error() {
        let doc = SharedDoc::new();
        let mut sync = DocSync::new(&doc, &presence("a")).unwrap();
        let frame = Message::Sync(SyncMessage::SyncStep2(b"not an update".to_vec())).encode_v1();
        assert!(sync.handle_frame(&doc, &frame).is_err());
        assert!(!sync.is_synced());
    }

    #[test]
    fn awareness_shares_the_document() {
        let doc = SharedDoc::with_client_id(11);
        let sync = DocSync::new(&doc, &presence("a")).unwrap();
        assert_eq!(sync.awareness.doc().client_id(), 11);
    }
}
