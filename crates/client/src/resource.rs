// Uniform teardown for per-room resources.

use mdroom_common::types::RoomId;
use thiserror::Error;
use tracing::{debug, warn};

/// Capability implemented by every resource a collaboration bundle owns.
///
/// `dispose` must be idempotent: disposing twice is not an error.
pub trait Disposable {
    fn resource_name(&self) -> &'static str;

    fn dispose(&mut self) -> Result<(), DisposeError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DisposeError {
    #[error("{resource} state lock was poisoned")]
    Poisoned { resource: &'static str },
    #[error("{resource} failed to shut down: {message}")]
    Failed { resource: &'static str, message: String },
}

/// Dispose `steps` front to back. A failing step is logged and skipped;
/// later steps always run. Returns the number of failed steps.
pub fn dispose_in_order(room: &RoomId, steps: &mut [&mut dyn Disposable]) -> usize {
    let mut failures = 0;
    for step in steps.iter_mut() {
        let resource = step.resource_name();
        match step.dispose() {
            Ok(()) => debug!(room = %room, resource, "resource disposed"),
            Err(error) => {
                failures += 1;
                warn!(room = %room, resource, %error, "resource teardown failed, continuing");
            }
        }
    }
    failures
}
