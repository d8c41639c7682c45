/// Identifier for one generation request.
///
/// Every send gets a fresh target so late events from an abandoned stream can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamTarget(pub u64);

impl StreamTarget {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// One incremental unit delivered by the model service.
///
/// Only `text` is consumed. Structured parts (function calls, reasoning, usage) arrive as
/// fragments without text and carry no visible delta.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fragment {
    pub text: Option<String>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn without_text() -> Self {
        Self { text: None }
    }

    /// Returns the visible delta, if any.
    pub fn visible_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }
}

/// Provider-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Fragment(Fragment),
    Done,
    Error(String),
}

/// Stream payload tagged with the request it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn fragment(target: StreamTarget, fragment: Fragment) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Fragment(fragment),
        }
    }

    pub fn done(target: StreamTarget) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Done,
        }
    }

    pub fn error(target: StreamTarget, message: impl Into<String>) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Error(message.into()),
        }
    }
}
