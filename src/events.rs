//! Wire format of the chat protocol.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`;
//! `data` is absent for events without a payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{presence::Roster, store::ChatMessage};

/// Inbound events. A missing `data` reads as `null`, and a payload sent
/// with `typing`/`stop-typing` is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Frame")]
pub enum ClientEvent {
    /// Payload is expected to be a string; anything else resolves to the anonymous name.
    SetUsername(Value),
    UserMessage(Value),
    Typing,
    StopTyping,
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl TryFrom<Frame> for ClientEvent {
    type Error = String;

    fn try_from(Frame { event, data }: Frame) -> Result<Self, Self::Error> {
        Ok(match event.as_str() {
            "set-username" => Self::SetUsername(data),
            "user-message" => Self::UserMessage(data),
            "typing" => Self::Typing,
            "stop-typing" => Self::StopTyping,
            _ => return Err(format!("unknown event `{event}`")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    OnlineUsers(Vec<String>),
    TypingUsers(Vec<String>),
    MessageHistory(Vec<HistoryEntry>),
    Message(MessagePayload),
}

impl ServerEvent {
    pub fn roster(roster: Roster, names: Vec<String>) -> Self {
        match roster {
            Roster::Online => Self::OnlineUsers(names),
            Roster::Typing => Self::TypingUsers(names),
        }
    }

    pub fn history(messages: Vec<ChatMessage>) -> Self {
        Self::MessageHistory(messages.into_iter().map(HistoryEntry::from).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub author: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<ChatMessage> for HistoryEntry {
    fn from(ChatMessage { author, body, timestamp, .. }: ChatMessage) -> Self {
        Self { author, body, timestamp }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePayload {
    pub author: String,
    pub body: String,
    pub id: i64,
}

impl From<ChatMessage> for MessagePayload {
    fn from(ChatMessage { id, author, body, .. }: ChatMessage) -> Self {
        Self { author, body, id }
    }
}
