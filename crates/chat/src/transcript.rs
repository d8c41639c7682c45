use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::message::{Conversation, Message, MessageId, Role};

pub const USER_LABEL: &str = "You";
pub const ASSISTANT_LABEL: &str = "Assistant";

/// Display-ready view of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub id: MessageId,
    pub role: Role,
    pub speaker: &'static str,
    pub body: String,
    pub timestamp: String,
    pub in_progress: bool,
    /// User rows sit on the trailing edge.
    pub align_end: bool,
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transcript {
    pub entries: Vec<TranscriptEntry>,
    pub error_banner: Option<String>,
    pub clear_visible: bool,
    pub busy: bool,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn render(conversation: &Conversation) -> Transcript {
    render_in(conversation, &Local)
}

pub fn render_in<Tz>(conversation: &Conversation, tz: &Tz) -> Transcript
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    Transcript {
        entries: conversation
            .messages
            .iter()
            .map(|message| entry(message, tz))
            .collect(),
        error_banner: conversation.error.clone(),
        clear_visible: !conversation.is_empty(),
        busy: conversation.busy,
    }
}

/// Hours and minutes in `tz`.
pub fn format_timestamp<Tz>(timestamp: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    timestamp.with_timezone(tz).format("%H:%M").to_string()
}

fn entry<Tz>(message: &Message, tz: &Tz) -> TranscriptEntry
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let (speaker, align_end) = match message.role {
        Role::User => (USER_LABEL, true),
        Role::Assistant => (ASSISTANT_LABEL, false),
    };

    TranscriptEntry {
        id: message.id,
        role: message.role,
        speaker,
        body: message.content.clone(),
        timestamp: format_timestamp(message.timestamp, tz),
        in_progress: message.streaming,
        align_end,
    }
}
