#![deny(unsafe_code)]

/// Streaming response assembly.
pub mod assembler;
pub mod composer;
/// Message and conversation model.
pub mod message;
/// Conversation state manager.
pub mod session;
/// Render model consumed by the desktop view.
pub mod transcript;

pub use assembler::{StreamAssembler, partials};
pub use composer::{EnterAction, can_send, enter_action};
pub use message::{Conversation, Message, MessageId, Role};
pub use session::{
    ChatOptions, ChatSession, IgnoreReason, SEND_INTERRUPTED_MESSAGE, STREAM_CLOSED_MESSAGE,
    SendOutcome, Snapshot, SnapshotReceiver,
};
pub use transcript::{Transcript, TranscriptEntry, format_timestamp, render};
