// Two-way link between a room's shared document and its editor buffer.

use mdroom_common::crdt::origin::TxnOrigin;
use mdroom_common::types::RoomId;
use thiserror::Error;
use tracing::trace;

use crate::engine::buffer::{BufferError, BufferHandle};
use crate::engine::ydoc::{SharedDoc, TextEdit, TextEditError};
use crate::resource::{DisposeError, Disposable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("binding for room `{0}` has been released")]
    Released(RoomId),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Edit(#[from] TextEditError),
}

/// Keeps a buffer's content equal to the shared text while bound.
///
/// Releasing the binding leaves the buffer itself alive: the cache owns it.
#[derive(Debug)]
pub struct BufferBinding {
    buffer: BufferHandle,
    bound: bool,
}

impl BufferBinding {
    pub fn bind(buffer: BufferHandle) -> Self {
        Self { buffer, bound: true }
    }

    pub fn buffer(&self) -> &BufferHandle {
        &self.buffer
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Copy the shared text into the buffer. Returns the new text when the
    /// buffer content actually changed.
    pub fn refresh(&self, doc: &SharedDoc) -> Result<Option<String>, BindingError> {
        self.ensure_bound()?;
        let text = doc.text();
        if self.buffer.replace_content(&text)? {
            trace!(room = %self.buffer.room(), version = self.buffer.version(), "buffer refreshed");
            return Ok(Some(text));
        }
        Ok(None)
    }

    /// Apply a user edit through the shared document and mirror it into the
    /// buffer. Returns the encoded update to broadcast.
    pub fn apply_local_edit(
        &self,
        doc: &SharedDoc,
        edit: &TextEdit,
    ) -> Result<Vec<u8>, BindingError> {
        self.ensure_bound()?;
        self.buffer.ensure_writable()?;
        let update = doc.apply_edit(edit, TxnOrigin::LocalEdit)?;
        self.buffer.replace_content(&doc.text())?;
        self.buffer.mark_dirty();
        Ok(update)
    }

    fn ensure_bound(&self) -> Result<(), BindingError> {
        if self.bound {
            Ok(())
        } else {
            Err(BindingError::Released(self.buffer.room().clone()))
        }
    }
}

impl Disposable for BufferBinding {
    fn resource_name(&self) -> &'static str {
        "buffer_binding"
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        if self.bound {
            self.bound = false;
            // Unbound buffers never accept input until the next attach decides.
            if self.buffer.set_read_only(true).is_err() {
                trace!(room = %self.buffer.room(), "buffer already disposed at unbind");
            }
        }
        Ok(())
    }
}
