//! Backend-originated events delivered to bots.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of events a bot can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageReceived,
    MessageEdited,
    MessageDeleted,
    ChatJoined,
    ChatLeft,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::MessageReceived => "message_received",
            EventKind::MessageEdited => "message_edited",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::ChatJoined => "chat_joined",
            EventKind::ChatLeft => "chat_left",
        };
        f.write_str(s)
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message_received" => Ok(EventKind::MessageReceived),
            "message_edited" => Ok(EventKind::MessageEdited),
            "message_deleted" => Ok(EventKind::MessageDeleted),
            "chat_joined" => Ok(EventKind::ChatJoined),
            "chat_left" => Ok(EventKind::ChatLeft),
            other => Err(format!("invalid event kind: '{other}'")),
        }
    }
}

/// A chat message as reported by the messaging backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: Option<i64>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub reactions: Vec<String>,
}

/// An event pushed by the messaging backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendEvent {
    MessageReceived(Message),
    MessageEdited(Message),
    MessageDeleted { chat_id: i64, message_id: i64 },
    ChatJoined { chat_id: i64 },
    ChatLeft { chat_id: i64 },
}

impl BackendEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BackendEvent::MessageReceived(_) => EventKind::MessageReceived,
            BackendEvent::MessageEdited(_) => EventKind::MessageEdited,
            BackendEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            BackendEvent::ChatJoined { .. } => EventKind::ChatJoined,
            BackendEvent::ChatLeft { .. } => EventKind::ChatLeft,
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            BackendEvent::MessageReceived(m) | BackendEvent::MessageEdited(m) => m.chat_id,
            BackendEvent::MessageDeleted { chat_id, .. }
            | BackendEvent::ChatJoined { chat_id }
            | BackendEvent::ChatLeft { chat_id } => *chat_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_matches_variant() {
        let msg = Message {
            chat_id: 1,
            message_id: 10,
            sender_id: Some(5),
            text: "help".into(),
            timestamp: Utc::now(),
            pinned: false,
            reactions: Vec::new(),
        };
        let event = BackendEvent::MessageReceived(msg);
        assert_eq!(event.kind(), EventKind::MessageReceived);
        assert_eq!(event.chat_id(), 1);

        let deleted = BackendEvent::MessageDeleted { chat_id: 3, message_id: 4 };
        assert_eq!(deleted.kind(), EventKind::MessageDeleted);
        assert_eq!(deleted.chat_id(), 3);
    }

    #[test]
    fn test_backend_event_is_internally_tagged() {
        let json = serde_json::to_value(BackendEvent::ChatJoined { chat_id: 7 }).unwrap();
        assert_eq!(json["kind"], "chat_joined");
        assert_eq!(json["chat_id"], 7);
    }
}
