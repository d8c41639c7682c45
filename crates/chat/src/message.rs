use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque, unique identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry.
///
/// User messages are complete at creation. An assistant message starts empty with
/// `streaming = true`, grows in place, and is frozen once `streaming` flips to false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub streaming: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            content: content.into(),
            role: Role::User,
            timestamp: Utc::now(),
            streaming: false,
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::new_v7(),
            content: String::new(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            streaming: true,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Ordered, append-only transcript plus the last error and the busy flag.
///
/// Insertion order is display order. At most one message is streaming at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
    pub error: Option<String>,
    pub busy: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.streaming)
    }

    pub(crate) fn remove(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|message| message.id == id)?;
        Some(self.messages.remove(index))
    }
}
