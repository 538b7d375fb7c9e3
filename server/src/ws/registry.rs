//! Connection registry: which user is reachable through which socket.
//!
//! Two maps are kept:
//! - `users`: UserId → the handle messages for that user are routed to. At
//!   most one per user; a newer connection replaces the older entry.
//! - `live`: every open socket, including ones superseded in `users`. Presence
//!   updates go to all of them.
//!
//! Readers (`lookup`) go straight to the sharded map. Writers serialize on
//! `write_lock`, and the presence snapshot plus its fan-out are produced while
//! the lock is held, so every client sees snapshots in mutation order.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use parley_proto::UserId;

use super::{ConnectionHandle, ConnectionId};
use crate::chat::presence;

/// Sorted list of users that currently hold a registry entry.
pub type PresenceSet = Vec<UserId>;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, ConnectionHandle>,
    live: DashMap<ConnectionId, ConnectionHandle>,
    write_lock: Mutex<()>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle.user_id` to `handle`, replacing any previous binding, and
    /// announce the resulting presence set to every live socket.
    pub fn register(&self, handle: ConnectionHandle) -> PresenceSet {
        let _guard = self.lock();

        self.live.insert(handle.id(), handle.clone());
        if let Some(previous) = self.users.insert(handle.user_id().clone(), handle.clone()) {
            if !previous.same_connection(&handle) {
                tracing::debug!(
                    user_id = %handle.user_id(),
                    previous = previous.id(),
                    connection_id = handle.id(),
                    "Registry entry replaced by newer connection"
                );
            }
        }

        let online = self.collect_online();
        presence::announce(self.live.iter().map(|e| e.value().clone()), &online);

        tracing::debug!(
            user_id = %handle.user_id(),
            connection_id = handle.id(),
            online = online.len(),
            "Connection registered"
        );
        online
    }

    /// Forget `handle`'s socket and drop the user binding only if it still
    /// points at this very connection. A stale disconnect never evicts a
    /// newer connection for the same user.
    ///
    /// Presence is announced only when the online set actually changed.
    pub fn unregister(&self, handle: &ConnectionHandle) -> PresenceSet {
        let _guard = self.lock();

        self.live.remove(&handle.id());
        let removed = self
            .users
            .remove_if(handle.user_id(), |_, current| current.same_connection(handle))
            .is_some();

        let online = self.collect_online();
        if removed {
            presence::announce(self.live.iter().map(|e| e.value().clone()), &online);
            tracing::debug!(
                user_id = %handle.user_id(),
                connection_id = handle.id(),
                online = online.len(),
                "Connection unregistered"
            );
        } else {
            tracing::debug!(
                user_id = %handle.user_id(),
                connection_id = handle.id(),
                "Superseded connection closed, registry entry kept"
            );
        }
        online
    }

    /// Handle messages for `user_id` should be pushed to, if any.
    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.users.get(user_id).map(|entry| entry.value().clone())
    }

    /// Point-in-time online set, consistent with respect to mutations.
    pub fn snapshot(&self) -> PresenceSet {
        let _guard = self.lock();
        self.collect_online()
    }

    /// Number of open sockets, superseded ones included.
    pub fn connection_count(&self) -> usize {
        self.live.len()
    }

    fn collect_online(&self) -> PresenceSet {
        let mut online: PresenceSet = self.users.iter().map(|e| e.key().clone()).collect();
        online.sort();
        online
    }

    // The guarded data is `()`, so a poisoned lock carries no broken state.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use parley_proto::ServerEvent;
    use tokio::sync::mpsc;

    use super::*;

    fn connect(user: &str) -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionHandle::new(UserId::from(user), tx), rx)
    }

    fn drain_presence(rx: &mut mpsc::Receiver<Message>) -> Vec<PresenceSet> {
        let mut seen = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Message::Text(text) = frame {
                if let Ok(ServerEvent::PresenceUpdate { online }) =
                    serde_json::from_str::<ServerEvent>(text.as_str())
                {
                    seen.push(online);
                }
            }
        }
        seen
    }

    #[test]
    fn register_then_unregister_round_trips_presence() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = connect("alice");

        assert_eq!(registry.register(alice.clone()), vec![UserId::from("alice")]);
        assert!(registry.lookup(&UserId::from("alice")).is_some());

        assert!(registry.unregister(&alice).is_empty());
        assert!(registry.lookup(&UserId::from("alice")).is_none());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn stale_unregister_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let (tab_a, _rx_a) = connect("alice");
        let (tab_b, _rx_b) = connect("alice");

        registry.register(tab_a.clone());
        registry.register(tab_b.clone());
        registry.unregister(&tab_a);

        let current = registry.lookup(&UserId::from("alice")).unwrap();
        assert!(current.same_connection(&tab_b));
        assert_eq!(registry.snapshot(), vec![UserId::from("alice")]);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn each_mutation_announces_once_to_every_live_socket() {
        let registry = ConnectionRegistry::new();
        let (alice, mut rx_alice) = connect("alice");
        let (bob, mut rx_bob) = connect("bob");

        registry.register(alice.clone());
        registry.register(bob.clone());
        registry.unregister(&bob);

        assert_eq!(
            drain_presence(&mut rx_alice),
            vec![
                vec![UserId::from("alice")],
                vec![UserId::from("alice"), UserId::from("bob")],
                vec![UserId::from("alice")],
            ]
        );
        // bob saw his own registration only; he was gone before the last one
        assert_eq!(
            drain_presence(&mut rx_bob),
            vec![vec![UserId::from("alice"), UserId::from("bob")]]
        );
    }

    #[test]
    fn superseded_socket_still_receives_presence() {
        let registry = ConnectionRegistry::new();
        let (tab_a, mut rx_a) = connect("alice");
        let (tab_b, _rx_b) = connect("alice");
        let (bob, _rx_bob) = connect("bob");

        registry.register(tab_a);
        registry.register(tab_b);
        drain_presence(&mut rx_a);

        registry.register(bob);
        assert_eq!(
            drain_presence(&mut rx_a),
            vec![vec![UserId::from("alice"), UserId::from("bob")]]
        );
    }

    #[test]
    fn stale_unregister_does_not_broadcast() {
        let registry = ConnectionRegistry::new();
        let (tab_a, _rx_a) = connect("alice");
        let (tab_b, mut rx_b) = connect("alice");

        registry.register(tab_a.clone());
        registry.register(tab_b);
        drain_presence(&mut rx_b);

        registry.unregister(&tab_a);
        assert!(drain_presence(&mut rx_b).is_empty());
    }

    #[test]
    fn concurrent_connects_all_land() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let (handle, rx) = connect(&format!("user-{i}"));
                    registry.register(handle);
                    rx
                })
            })
            .collect();
        let _receivers: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(registry.snapshot().len(), 8);
    }
}
