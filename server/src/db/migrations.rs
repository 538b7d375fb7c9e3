use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Progress is tracked in the SQLite `user_version` pragma.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Direct messages

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    text TEXT,
    image_ref TEXT,
    sentiment TEXT,
    sentiment_score REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    CHECK (text IS NOT NULL OR image_ref IS NOT NULL)
);

CREATE INDEX idx_messages_pair ON messages(sender_id, receiver_id, created_at);
",
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }
}
