// Shared-document handle: a yrs document whose editable content lives in
// the text type named `SHARED_TEXT_NAME`.

use anyhow::{bail, Context, Result};
use mdroom_common::crdt::origin::TxnOrigin;
use mdroom_common::protocol::collab::SHARED_TEXT_NAME;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

use crate::resource::{DisposeError, Disposable};

/// A single local edit expressed in Unicode scalar values (chars).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub index: u32,
    #[serde(default)]
    pub delete: u32,
    #[serde(default)]
    pub insert: String,
}

impl TextEdit {
    pub fn insert(index: u32, text: impl Into<String>) -> Self {
        Self { index, delete: 0, insert: text.into() }
    }

    pub fn delete(index: u32, len: u32) -> Self {
        Self { index, delete: len, insert: String::new() }
    }

    pub fn is_noop(&self) -> bool {
        self.delete == 0 && self.insert.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextEditError {
    #[error("edit range {index}..{end} is outside the document (length {len})")]
    OutOfRange { index: u32, end: u32, len: u32 },
    #[error("shared document has been destroyed")]
    Destroyed,
}

/// Wrapper around the yrs document backing one room.
pub struct SharedDoc {
    doc: Doc,
    destroyed: bool,
}

impl SharedDoc {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new(), destroyed: false }
    }

    /// Create a document with a specific client ID (for deterministic testing).
    pub fn with_client_id(client_id: u64) -> Self {
        Self { doc: Doc::with_client_id(client_id), destroyed: false }
    }

    /// Load a document from a binary state (full snapshot).
    pub fn from_state(data: &[u8]) -> Result<Self> {
        let doc = Doc::new();
        let update = Update::decode_v1(data).context("failed to decode Yjs state")?;
        doc.transact_mut().apply_update(update).context("failed to apply Yjs state update")?;
        Ok(Self { doc, destroyed: false })
    }

    /// Apply an update received from the collaboration endpoint.
    pub fn apply_remote_update(&self, data: &[u8]) -> Result<()> {
        if self.destroyed {
            bail!("cannot apply update to a destroyed document");
        }
        let update = Update::decode_v1(data).context("failed to decode Yjs update")?;
        self.doc
            .transact_mut_with(TxnOrigin::Remote)
            .apply_update(update)
            .context("failed to apply Yjs update")?;
        Ok(())
    }

    /// Encode the full document state as a binary blob.
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the state vector (logical timestamp) for sync protocol.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Compute a diff (update) containing all changes since the given state vector.
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv).context("failed to decode state vector")?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    /// Current content of the shared text.
    pub fn text(&self) -> String {
        let text = self.doc.get_or_insert_text(SHARED_TEXT_NAME);
        text.get_string(&self.doc.transact())
    }

    pub fn is_text_empty(&self) -> bool {
        let text = self.doc.get_or_insert_text(SHARED_TEXT_NAME);
        text.len(&self.doc.transact()) == 0
    }

    /// Insert `content` only if the shared text is still empty, checked and
    /// written inside one transaction. Returns the encoded update when seeded.
    pub fn seed_if_empty(&self, content: &str) -> Option<Vec<u8>> {
        if self.destroyed || content.is_empty() {
            return None;
        }
        let text = self.doc.get_or_insert_text(SHARED_TEXT_NAME);
        let mut txn = self.doc.transact_mut_with(TxnOrigin::Seed);
        if text.len(&txn) > 0 {
            return None;
        }
        text.insert(&mut txn, 0, content);
        Some(txn.encode_update_v1())
    }

    /// Apply a char-indexed edit and return the encoded update for peers.
    pub fn apply_edit(&self, edit: &TextEdit, origin: TxnOrigin) -> Result<Vec<u8>, TextEditError> {
        if self.destroyed {
            return Err(TextEditError::Destroyed);
        }
        let text = self.doc.get_or_insert_text(SHARED_TEXT_NAME);
        let mut txn = self.doc.transact_mut_with(origin);
        let current = text.get_string(&txn);
        let len = current.chars().count() as u32;
        let end = edit.index.saturating_add(edit.delete);
        if end > len {
            return Err(TextEditError::OutOfRange { index: edit.index, end, len });
        }

        let start_byte = byte_offset(&current, edit.index);
        let end_byte = byte_offset(&current, end);
        if end_byte > start_byte {
            text.remove_range(&mut txn, start_byte, end_byte - start_byte);
        }
        if !edit.insert.is_empty() {
            text.insert(&mut txn, start_byte, &edit.insert);
        }
        Ok(txn.encode_update_v1())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Get the underlying Doc reference (for advanced operations).
    pub fn inner(&self) -> &Doc {
        &self.doc
    }
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for SharedDoc {
    fn resource_name(&self) -> &'static str {
        "shared_doc"
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        self.destroyed = true;
        Ok(())
    }
}

fn byte_offset(text: &str, char_index: u32) -> u32 {
    text.char_indices().nth(char_index as usize).map(|(offset, _)| offset).unwrap_or(text.len())
        as u32
}
