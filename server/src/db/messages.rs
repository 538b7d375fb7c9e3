//! Message persistence.
//!
//! [`MessageStore`] is the narrow interface the send and history handlers use;
//! [`SqliteMessageStore`] is the production implementation. Calls are
//! blocking and run under `spawn_blocking` from async code.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_proto::{Message, MessageId, Sentiment, UserId};
use rusqlite::Row;

use super::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored timestamp is malformed: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// A message before the store assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image_ref: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_score: f64,
}

pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning id and `created_at`.
    fn persist(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Every message exchanged between `a` and `b`, oldest first.
    fn history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl MessageStore for SqliteMessageStore {
    fn persist(&self, message: NewMessage) -> Result<Message, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;

        let stored = Message {
            id: MessageId::new(uuid::Uuid::now_v7().to_string()),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text,
            image_ref: message.image_ref,
            sentiment: message.sentiment,
            sentiment_score: message.sentiment_score,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image_ref, sentiment, sentiment_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                stored.id.as_str(),
                stored.sender_id.as_str(),
                stored.receiver_id.as_str(),
                stored.text,
                stored.image_ref,
                stored.sentiment.map(|s| s.as_str()),
                stored.sentiment_score,
                stored.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;

        Ok(stored)
    }

    fn history(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;

        // Fixed-width timestamps sort lexically. UUIDv7 ids break ties
        // between messages stored in the same instant.
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, receiver_id, text, image_ref, sentiment, sentiment_score, created_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![a.as_str(), b.as_str()], read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

/// Raw column values; the timestamp is parsed outside the rusqlite closure.
struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    text: Option<String>,
    image_ref: Option<String>,
    sentiment: Option<String>,
    sentiment_score: f64,
    created_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image_ref: row.get(4)?,
        sentiment: row.get(5)?,
        sentiment_score: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl MessageRow {
    fn into_message(self) -> Result<Message, StoreError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc);
        Ok(Message {
            id: MessageId::new(self.id),
            sender_id: UserId::new(self.sender_id),
            receiver_id: UserId::new(self.receiver_id),
            text: self.text,
            image_ref: self.image_ref,
            sentiment: self.sentiment.as_deref().and_then(Sentiment::parse),
            sentiment_score: self.sentiment_score,
            created_at,
        })
    }
}
