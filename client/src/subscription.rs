//! Client-side view of the open conversation.
//!
//! A [`SubscriptionManager`] holds at most one conversation at a time. Opening
//! one attaches a listener to the [`EventFeed`] before history is fetched, so a
//! message pushed while the fetch is in flight waits in the listener and is
//! merged afterwards. Everything is deduplicated by message id.
//!
//! When the connection behind the feed goes away the conversation is closed
//! and the manager falls back to [`SubscriptionState::Unsubscribed`].

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use parley_proto::{Message, MessageId, UserId};

use crate::api::HistorySource;
use crate::error::ClientError;
use crate::events::{EventFeed, Listener, Polled};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed(UserId),
}

type MessageCallback = Box<dyn FnMut(&Message) + Send>;

struct Conversation {
    partner: UserId,
    listener: Listener,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl Conversation {
    fn new(partner: UserId, listener: Listener) -> Self {
        Self {
            partner,
            listener,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Insert in `(createdAt, id)` order unless the id is already held.
    /// Returns the position it landed at.
    fn insert(&mut self, message: Message) -> Option<usize> {
        if !self.seen.insert(message.id.clone()) {
            return None;
        }
        let key = (&message.created_at, &message.id);
        let at = self
            .messages
            .partition_point(|m| (&m.created_at, &m.id) <= key);
        self.messages.insert(at, message);
        Some(at)
    }

    /// Live events only count when the partner sent them.
    fn accept_live(&mut self, message: Message) -> Option<usize> {
        if message.sender_id != self.partner {
            tracing::trace!(
                sender_id = %message.sender_id,
                partner = %self.partner,
                "Ignoring event for another conversation"
            );
            return None;
        }
        self.insert(message)
    }

    fn belongs(&self, message: &Message) -> bool {
        message.sender_id == self.partner || message.receiver_id == self.partner
    }
}

pub struct SubscriptionManager<H> {
    feed: EventFeed,
    history: H,
    active: Option<Conversation>,
    on_message: Option<MessageCallback>,
    needs_resync: bool,
}

impl<H: HistorySource> SubscriptionManager<H> {
    pub fn new(feed: EventFeed, history: H) -> Self {
        Self {
            feed,
            history,
            active: None,
            on_message: None,
            needs_resync: false,
        }
    }

    /// Switch to the conversation with `partner`.
    ///
    /// Any open conversation is closed first. On a failed fetch the new
    /// listener is dropped and the manager stays unsubscribed.
    pub async fn open(&mut self, partner: UserId) -> Result<(), ClientError> {
        self.close();

        let listener = self.feed.subscribe();
        let history = self.history.fetch_history(&partner).await?;

        let mut conversation = Conversation::new(partner, listener);
        for message in history {
            conversation.insert(message);
        }
        tracing::debug!(
            partner = %conversation.partner,
            history = conversation.messages.len(),
            "Conversation opened"
        );
        self.active = Some(conversation);
        self.needs_resync = false;

        self.pump();
        Ok(())
    }

    /// Detach from the bus and forget the open conversation.
    pub fn close(&mut self) {
        if let Some(conversation) = self.active.take() {
            tracing::debug!(partner = %conversation.partner, "Conversation closed");
        }
        self.needs_resync = false;
    }

    /// Apply every event already waiting in the listener. Returns how many
    /// were accepted. Closes the conversation if the feed has ended.
    pub fn pump(&mut self) -> usize {
        let Self {
            active,
            on_message,
            needs_resync,
            ..
        } = self;
        let Some(conversation) = active.as_mut() else {
            return 0;
        };

        let mut accepted = 0;
        let ended = loop {
            match conversation.listener.try_next() {
                Polled::Event(message) => {
                    if let Some(at) = conversation.accept_live(message) {
                        accepted += 1;
                        notify(on_message, &conversation.messages[at]);
                    }
                }
                Polled::Lagged(skipped) => mark_lagged(needs_resync, skipped),
                Polled::Empty => break false,
                Polled::Closed => break true,
            }
        };
        if ended {
            self.feed_ended();
        }
        accepted
    }

    /// Wait for the next accepted live message.
    ///
    /// Returns `None` when no conversation is open, or when the connection
    /// feeding the bus is gone; in that case the conversation is closed.
    /// Cancel-safe.
    pub async fn next_message(&mut self) -> Option<Message> {
        let Self {
            active,
            on_message,
            needs_resync,
            ..
        } = self;
        let conversation = active.as_mut()?;

        loop {
            match conversation.listener.next().await {
                Polled::Event(message) => {
                    if let Some(at) = conversation.accept_live(message) {
                        let accepted = conversation.messages[at].clone();
                        notify(on_message, &accepted);
                        return Some(accepted);
                    }
                }
                Polled::Lagged(skipped) => mark_lagged(needs_resync, skipped),
                Polled::Closed => break,
                Polled::Empty => {}
            }
        }

        self.feed_ended();
        None
    }

    /// Add the stored copy of a message this client just sent. Ignored when
    /// it belongs to another conversation or is already held.
    pub fn record_sent(&mut self, message: Message) -> bool {
        match self.active.as_mut() {
            Some(conversation) if conversation.belongs(&message) => {
                conversation.insert(message).is_some()
            }
            _ => false,
        }
    }

    /// Refetch history for the open conversation and merge it. Returns the
    /// number of messages that were missing.
    pub async fn resync(&mut self) -> Result<usize, ClientError> {
        let Some(partner) = self.active.as_ref().map(|c| c.partner.clone()) else {
            return Ok(0);
        };

        let history = self.history.fetch_history(&partner).await?;

        let Some(conversation) = self.active.as_mut() else {
            return Ok(0);
        };
        let added = history
            .into_iter()
            .filter_map(|m| conversation.insert(m))
            .count();
        self.needs_resync = false;
        tracing::debug!(partner = %partner, added, "Conversation resynced");

        self.pump();
        Ok(added)
    }

    pub fn state(&self) -> SubscriptionState {
        match &self.active {
            Some(c) => SubscriptionState::Subscribed(c.partner.clone()),
            None => SubscriptionState::Unsubscribed,
        }
    }

    /// Messages of the open conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.active
            .as_ref()
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    /// Set when the listener fell behind the bus and events were lost.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Run `callback` for every accepted live message. A panic inside it is
    /// caught and logged.
    pub fn set_on_message<F>(&mut self, callback: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.on_message = Some(Box::new(callback));
    }

    fn feed_ended(&mut self) {
        if let Some(conversation) = self.active.take() {
            tracing::info!(partner = %conversation.partner, "Event feed ended, conversation closed");
        }
        self.needs_resync = false;
    }
}

fn notify(callback: &mut Option<MessageCallback>, message: &Message) {
    let Some(callback) = callback.as_mut() else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
        tracing::warn!(message_id = %message.id, "on_message callback panicked");
    }
}

fn mark_lagged(needs_resync: &mut bool, skipped: u64) {
    tracing::warn!(skipped, "Listener lagged behind the event bus, resync needed");
    *needs_resync = true;
}
