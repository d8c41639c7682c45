use gpui::{Pixels, ScrollHandle, px};

/// Distance from the tail within which new content keeps the view pinned.
const AUTO_FOLLOW_THRESHOLD: Pixels = px(24.);

/// Keeps the transcript pinned to its newest row unless the user scrolled away.
pub struct ScrollManager {
    scroll_handle: ScrollHandle,
    pending_scroll_to_bottom: bool,
}

impl ScrollManager {
    pub fn new() -> Self {
        Self {
            scroll_handle: ScrollHandle::new(),
            pending_scroll_to_bottom: true,
        }
    }

    pub fn handle(&self) -> &ScrollHandle {
        &self.scroll_handle
    }

    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
    }

    /// Called before new content is laid out, so the offsets describe what the user sees.
    pub fn request_scroll_to_bottom_if_following(&mut self) {
        if self.is_near_bottom() {
            self.pending_scroll_to_bottom = true;
        }
    }

    /// Scrolls the child at `tail_index` into view. Layout resolves the final offset.
    pub fn apply_pending_scroll(&mut self, tail_index: usize) -> bool {
        let should_scroll = self.pending_scroll_to_bottom;
        if should_scroll {
            self.scroll_handle.scroll_to_item(tail_index);
        }

        self.pending_scroll_to_bottom = false;
        should_scroll
    }

    fn is_near_bottom(&self) -> bool {
        let max_offset = self.scroll_handle.max_offset().height;
        if max_offset <= Pixels::ZERO {
            return true;
        }

        // Scrolling down moves the y offset negative; the tail sits at `-max_offset`.
        let offset = self.scroll_handle.offset().y;
        (offset + max_offset).abs() <= AUTO_FOLLOW_THRESHOLD
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new()
    }
}
