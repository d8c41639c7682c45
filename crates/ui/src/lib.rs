#![deny(unsafe_code)]

/// Application shell and window-level actions.
pub mod app;
/// Conversation view, transcript and composer widgets.
pub mod chat;
/// Model settings resolution.
pub mod settings;
