//! Fan-out of named events to every connected client.

use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error};

/// Failures of a broadcast as a whole.
///
/// Per-client delivery problems never show up here; each connection
/// deals with its own socket.
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("hub is shut down")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Something that can push an event to all connected clients.
///
/// Implementations must not block on client acknowledgement: the call
/// happens on the file-watcher thread.
pub trait Broadcaster: Send + Sync {
    fn broadcast_all(&self, event: &str) -> Result<(), BroadcastError>;
}

/// Broadcasts `event` and swallows any failure after logging it.
///
/// This is the boundary between the watcher and the transport. Neither an
/// error nor a panic from the broadcaster makes it back to the caller.
pub fn dispatch(broadcaster: &dyn Broadcaster, event: &str) {
    match catch_unwind(AssertUnwindSafe(|| broadcaster.broadcast_all(event))) {
        Ok(Ok(())) => debug!("Dispatched {}", event),
        Ok(Err(e)) => error!("Error notifying clients of {}: {}", event, e),
        Err(_) => error!("Broadcaster panicked while notifying clients of {}", event),
    }
}
