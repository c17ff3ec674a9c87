// Editor buffers: the per-room text model the presentation layer renders.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mdroom_common::types::RoomId;
use thiserror::Error;

use crate::resource::{DisposeError, Disposable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer for room `{0}` has been disposed")]
    Disposed(RoomId),
    #[error("buffer for room `{0}` is read-only")]
    ReadOnly(RoomId),
}

#[derive(Debug)]
struct BufferState {
    content: String,
    read_only: bool,
    focused: bool,
    dirty: bool,
    disposed: bool,
    version: u64,
}

#[derive(Debug)]
struct EditorBuffer {
    room: RoomId,
    state: Mutex<BufferState>,
}

/// Shared handle to one room's editor buffer.
///
/// Cloning is cheap; the buffer cache owns the canonical handle and the
/// active bundle borrows a clone while attached.
#[derive(Debug, Clone)]
pub struct BufferHandle(Arc<EditorBuffer>);

/// Point-in-time copy of a buffer's observable attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub content: String,
    pub read_only: bool,
    pub focused: bool,
    pub dirty: bool,
    pub version: u64,
}

impl BufferHandle {
    pub fn new(room: RoomId, content: impl Into<String>) -> Self {
        Self(Arc::new(EditorBuffer {
            room,
            state: Mutex::new(BufferState {
                content: content.into(),
                read_only: false,
                focused: false,
                dirty: false,
                disposed: false,
                version: 0,
            }),
        }))
    }

    pub fn room(&self) -> &RoomId {
        &self.0.room
    }

    pub fn content(&self) -> String {
        self.lock().content.clone()
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.lock();
        BufferSnapshot {
            content: state.content.clone(),
            read_only: state.read_only,
            focused: state.focused,
            dirty: state.dirty,
            version: state.version,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.lock().read_only
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Replace the content with text that came from the shared document.
    /// Allowed on read-only buffers; only disposal blocks it.
    pub fn replace_content(&self, content: &str) -> Result<bool, BufferError> {
        let mut state = self.lock();
        if state.disposed {
            return Err(BufferError::Disposed(self.0.room.clone()));
        }
        if state.content == content {
            return Ok(false);
        }
        state.content.clear();
        state.content.push_str(content);
        state.version += 1;
        Ok(true)
    }

    /// Gate for user-originated writes.
    pub fn ensure_writable(&self) -> Result<(), BufferError> {
        let state = self.lock();
        if state.disposed {
            return Err(BufferError::Disposed(self.0.room.clone()));
        }
        if state.read_only {
            return Err(BufferError::ReadOnly(self.0.room.clone()));
        }
        Ok(())
    }

    pub fn mark_dirty(&self) {
        self.lock().dirty = true;
    }

    pub fn mark_clean(&self) {
        self.lock().dirty = false;
    }

    pub fn set_read_only(&self, read_only: bool) -> Result<(), BufferError> {
        let mut state = self.lock();
        if state.disposed {
            return Err(BufferError::Disposed(self.0.room.clone()));
        }
        state.read_only = read_only;
        if read_only {
            state.focused = false;
        }
        Ok(())
    }

    pub fn focus(&self) -> Result<(), BufferError> {
        let mut state = self.lock();
        if state.disposed {
            return Err(BufferError::Disposed(self.0.room.clone()));
        }
        state.focused = true;
        Ok(())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Disposable for BufferHandle {
    fn resource_name(&self) -> &'static str {
        "buffer"
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        let mut state = self.lock();
        state.disposed = true;
        state.focused = false;
        state.content.clear();
        Ok(())
    }
}
