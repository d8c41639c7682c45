use futures::{Stream, StreamExt, future};
use oryx_llm::Fragment;

/// Folds fragments, in arrival order, into one growing string.
///
/// Content only ever grows. Fragments without visible text are counted but change nothing.
#[derive(Debug, Clone, Default)]
pub struct StreamAssembler {
    content: String,
    fragment_count: usize,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one fragment and returns the accumulated content if it changed.
    pub fn push(&mut self, fragment: &Fragment) -> Option<&str> {
        self.fragment_count += 1;
        let text = fragment.visible_text()?;
        self.content.push_str(text);
        Some(&self.content)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn into_content(self) -> String {
        self.content
    }
}

/// Lazily maps a fragment stream to the sequence of intermediate accumulated values.
pub fn partials<S>(fragments: S) -> impl Stream<Item = String>
where
    S: Stream<Item = Fragment>,
{
    fragments
        .scan(StreamAssembler::new(), |assembler, fragment| {
            future::ready(Some(assembler.push(&fragment).map(str::to_owned)))
        })
        .filter_map(future::ready)
}
