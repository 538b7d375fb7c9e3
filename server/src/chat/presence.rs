//! Presence broadcast.
//!
//! Every registry mutation sends the complete online list to every live
//! socket. Snapshots are self-contained, so a client that misses one still
//! converges on the next.

use axum::{extract::State, Json};
use parley_proto::{ServerEvent, UserId};

use crate::auth::middleware::AuthUser;
use crate::state::AppState;
use crate::ws::{encode_event, ConnectionHandle, PushError};

/// Push `online` as a `presence.update` to each connection.
/// Returns how many connections accepted the frame.
pub fn announce<I>(connections: I, online: &[UserId]) -> usize
where
    I: IntoIterator<Item = ConnectionHandle>,
{
    let event = ServerEvent::PresenceUpdate {
        online: online.to_vec(),
    };
    let Some(frame) = encode_event(&event) else {
        return 0;
    };

    let mut delivered = 0;
    for conn in connections {
        match conn.push(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(PushError::Full) => {
                tracing::warn!(
                    user_id = %conn.user_id(),
                    connection_id = conn.id(),
                    "Outbound queue full, presence update dropped"
                );
            }
            Err(PushError::Closed) => {
                tracing::debug!(
                    connection_id = conn.id(),
                    "Presence update skipped for closing connection"
                );
            }
        }
    }
    delivered
}

/// GET /api/presence -- Current online user ids. JWT auth required.
pub async fn get_presence(State(state): State<AppState>, _user: AuthUser) -> Json<Vec<UserId>> {
    Json(state.connections.snapshot())
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn announce_skips_full_and_closed_queues() {
        let (open_tx, mut open_rx) = mpsc::channel(4);
        let (full_tx, _full_rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        drop(closed_rx);

        let open = ConnectionHandle::new(UserId::from("a"), open_tx);
        let full = ConnectionHandle::new(UserId::from("b"), full_tx);
        full.push(Message::Text("filler".into())).unwrap();
        let closed = ConnectionHandle::new(UserId::from("c"), closed_tx);

        let online = vec![UserId::from("a"), UserId::from("b")];
        assert_eq!(announce(vec![open, full, closed], &online), 1);

        let Message::Text(text) = open_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        let event: ServerEvent = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(event, ServerEvent::PresenceUpdate { online });
    }
}
