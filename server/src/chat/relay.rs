//! Point-to-point relay of a stored message to its receiver's live socket.
//!
//! Delivery is best effort. The message is already persisted when the relay
//! runs, so an offline receiver or a socket that closed mid-flight only means
//! the message shows up on the next history fetch.

use parley_proto::{Message, ServerEvent};

use crate::ws::{encode_event, ConnectionRegistry, PushError};

/// Outcome of one relay attempt. Never an error for the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the receiver's connection.
    Pushed,
    /// Receiver has no registry entry.
    Offline,
    /// Receiver was registered but the push failed (closed or saturated).
    Dropped,
}

/// Push `message` as `message.new` to the receiver's connection, if any.
pub fn deliver(registry: &ConnectionRegistry, message: &Message) -> Delivery {
    let Some(conn) = registry.lookup(&message.receiver_id) else {
        tracing::debug!(
            message_id = %message.id,
            receiver_id = %message.receiver_id,
            "Receiver offline, message left for history fetch"
        );
        return Delivery::Offline;
    };

    let Some(frame) = encode_event(&ServerEvent::NewMessage(message.clone())) else {
        return Delivery::Dropped;
    };

    match conn.push(frame) {
        Ok(()) => {
            tracing::debug!(
                message_id = %message.id,
                receiver_id = %message.receiver_id,
                connection_id = conn.id(),
                "Message relayed"
            );
            Delivery::Pushed
        }
        Err(PushError::Closed) => {
            tracing::debug!(
                message_id = %message.id,
                receiver_id = %message.receiver_id,
                connection_id = conn.id(),
                "Receiver connection closed before push"
            );
            Delivery::Dropped
        }
        Err(PushError::Full) => {
            tracing::warn!(
                message_id = %message.id,
                receiver_id = %message.receiver_id,
                connection_id = conn.id(),
                "Receiver outbound queue full, live delivery dropped"
            );
            Delivery::Dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message as WsMessage;
    use chrono::Utc;
    use parley_proto::{MessageId, UserId};
    use tokio::sync::mpsc;

    use super::*;
    use crate::ws::ConnectionHandle;

    fn message(from: &str, to: &str, text: &str) -> Message {
        Message {
            id: MessageId::new(uuid::Uuid::now_v7().to_string()),
            sender_id: UserId::from(from),
            receiver_id: UserId::from(to),
            text: Some(text.to_string()),
            image_ref: None,
            sentiment: None,
            sentiment_score: 0.0,
            created_at: Utc::now(),
        }
    }

    fn new_messages(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let WsMessage::Text(text) = frame {
                if let Ok(ServerEvent::NewMessage(msg)) = serde_json::from_str(text.as_str()) {
                    out.push(msg);
                }
            }
        }
        out
    }

    #[test]
    fn pushes_only_to_the_receiver() {
        let registry = ConnectionRegistry::new();
        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.register(ConnectionHandle::new(UserId::from("1"), alice_tx));
        registry.register(ConnectionHandle::new(UserId::from("2"), bob_tx));

        let msg = message("2", "1", "hi");
        assert_eq!(deliver(&registry, &msg), Delivery::Pushed);

        let received = new_messages(&mut alice_rx);
        assert_eq!(received, vec![msg]);
        assert!(new_messages(&mut bob_rx).is_empty());
    }

    #[test]
    fn offline_receiver_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.register(ConnectionHandle::new(UserId::from("2"), bob_tx));

        assert_eq!(deliver(&registry, &message("2", "1", "hi")), Delivery::Offline);
        assert!(new_messages(&mut bob_rx).is_empty());
    }

    #[test]
    fn closed_socket_is_dropped_silently() {
        let registry = ConnectionRegistry::new();
        let (alice_tx, alice_rx) = mpsc::channel(8);
        registry.register(ConnectionHandle::new(UserId::from("1"), alice_tx));
        // socket died between register and unregister
        drop(alice_rx);

        assert_eq!(deliver(&registry, &message("2", "1", "hi")), Delivery::Dropped);
    }

    #[test]
    fn goes_to_the_newest_connection_only() {
        let registry = ConnectionRegistry::new();
        let (tab_a_tx, mut tab_a_rx) = mpsc::channel(8);
        let (tab_b_tx, mut tab_b_rx) = mpsc::channel(8);
        let tab_a = ConnectionHandle::new(UserId::from("1"), tab_a_tx);
        registry.register(tab_a.clone());
        registry.register(ConnectionHandle::new(UserId::from("1"), tab_b_tx));
        registry.unregister(&tab_a);

        assert_eq!(deliver(&registry, &message("2", "1", "hi")), Delivery::Pushed);
        assert!(new_messages(&mut tab_a_rx).is_empty());
        assert_eq!(new_messages(&mut tab_b_rx).len(), 1);
    }
}
