pub mod actor;
pub mod handler;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use parley_proto::{ServerEvent, UserId};
use tokio::sync::mpsc;

pub use registry::{ConnectionRegistry, PresenceSet};

/// Sender half of a connection's bounded outbound queue.
/// The writer task of the socket owns the receiving half.
pub type ConnectionSender = mpsc::Sender<Message>;

/// Process-unique id of one accepted socket.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh connection id. Ids are never reused within a process.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Why a push to a connection did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// Handle to one live client socket.
///
/// Cloning is cheap; clones share the same outbound queue and compare equal
/// through [`ConnectionHandle::same_connection`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, sender: ConnectionSender) -> Self {
        Self {
            id: next_connection_id(),
            user_id,
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a raw frame without waiting. A slow client fills its own queue
    /// and starts dropping frames; it never blocks the caller.
    pub fn push(&self, frame: Message) -> Result<(), PushError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

/// Encode a server event into a text frame, once per fan-out.
pub fn encode_event(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}
