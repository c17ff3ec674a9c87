pub mod binding;
pub mod buffer;
pub mod buffer_cache;
pub mod presence;
pub mod sync;
pub mod ydoc;
