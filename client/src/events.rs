//! In-process fan-out of inbound `message.new` events.
//!
//! The connection's reader task owns the [`EventBus`] and publishes every
//! pushed message on it. Consumers hold an [`EventFeed`], which can attach
//! listeners but does not keep the bus alive: once every `EventBus` handle is
//! dropped, attached listeners report [`Polled::Closed`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parley_proto::Message;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Default number of undelivered events a listener may fall behind by.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Publishing side.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Message>,
    listeners: Arc<AtomicUsize>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hand `message` to every attached listener.
    pub fn publish(&self, message: Message) {
        if self.tx.send(message).is_err() {
            tracing::trace!("Event published with no receivers");
        }
    }

    /// Subscribe-only handle onto this bus.
    pub fn feed(&self) -> EventFeed {
        EventFeed {
            rx: self.tx.subscribe(),
            listeners: Arc::clone(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }
}

/// Subscribe-only view of an [`EventBus`].
///
/// Holds a parked receiver that is never read; new listeners are cut from it
/// and start at the current tail.
#[derive(Debug)]
pub struct EventFeed {
    rx: broadcast::Receiver<Message>,
    listeners: Arc<AtomicUsize>,
}

impl Clone for EventFeed {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.resubscribe(),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl EventFeed {
    /// Attach a listener. It sees every event published from now on.
    pub fn subscribe(&self) -> Listener {
        let count = self.listeners.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(listeners = count, "Listener attached");
        Listener {
            rx: self.rx.resubscribe(),
            listeners: Arc::clone(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }
}

/// What a listener found when polled.
#[derive(Debug)]
pub enum Polled {
    Event(Message),
    /// The listener fell behind and `n` events were discarded.
    Lagged(u64),
    /// Nothing queued right now.
    Empty,
    /// Every publisher is gone.
    Closed,
}

/// Attached receiver. Detaches on drop.
#[derive(Debug)]
pub struct Listener {
    rx: broadcast::Receiver<Message>,
    listeners: Arc<AtomicUsize>,
}

impl Listener {
    pub fn try_next(&mut self) -> Polled {
        match self.rx.try_recv() {
            Ok(msg) => Polled::Event(msg),
            Err(TryRecvError::Lagged(n)) => Polled::Lagged(n),
            Err(TryRecvError::Empty) => Polled::Empty,
            Err(TryRecvError::Closed) => Polled::Closed,
        }
    }

    /// Wait for the next event. Never returns [`Polled::Empty`].
    pub async fn next(&mut self) -> Polled {
        match self.rx.recv().await {
            Ok(msg) => Polled::Event(msg),
            Err(RecvError::Lagged(n)) => Polled::Lagged(n),
            Err(RecvError::Closed) => Polled::Closed,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let count = self.listeners.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::trace!(listeners = count, "Listener detached");
    }
}
