//! Wire types shared by the Parley server and client.
//!
//! WebSocket events are JSON text frames tagged as
//! `{"event": "<name>", "data": {...}}`. REST bodies use the same [`Message`]
//! shape so a message fetched from history and one pushed live compare equal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier assigned to a message by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sentiment label attached to a message's text. Opaque to the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

/// A direct message between two users. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// URL of the hosted image, if the message carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub sentiment_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Events pushed from server to client over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full replacement of the online-user list.
    #[serde(rename = "presence.update")]
    PresenceUpdate { online: Vec<UserId> },
    /// A message addressed to the receiving connection's user.
    #[serde(rename = "message.new")]
    NewMessage(Message),
}

/// Body of `POST /api/messages/send/{receiver_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Image as a base64 data URL (`data:image/png;base64,...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SendMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }
}

/// JSON body of every HTTP error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: MessageId::new("m1"),
            sender_id: UserId::from("2"),
            receiver_id: UserId::from("1"),
            text: Some("hi".to_string()),
            image_ref: None,
            sentiment: Some(Sentiment::Neutral),
            sentiment_score: 0.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn new_message_event_uses_dotted_name_and_camel_case() {
        let json = serde_json::to_value(ServerEvent::NewMessage(sample())).unwrap();
        assert_eq!(json["event"], "message.new");
        assert_eq!(json["data"]["senderId"], "2");
        assert_eq!(json["data"]["receiverId"], "1");
        assert!(json["data"].get("imageRef").is_none());
    }

    #[test]
    fn presence_update_carries_plain_id_list() {
        let event = ServerEvent::PresenceUpdate {
            online: vec![UserId::from("1"), UserId::from("2")],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"presence.update","data":{"online":["1","2"]}}"#
        );
    }
}
