use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{ActiveTheme, h_flex, label::Label, text::TextView, v_flex};
use oryx_chat::{Role, TranscriptEntry};

use crate::chat::scroll_manager::ScrollManager;

const BUBBLE_MAX_WIDTH: Pixels = px(540.);
const BUBBLE_PADDING_X: Pixels = px(14.);
const BUBBLE_PADDING_Y: Pixels = px(10.);
const MARKDOWN_SAFE_FALLBACK_THRESHOLD_BYTES: usize = 128 * 1024;

/// Scrollable transcript of the current conversation.
pub struct MessageList {
    entries: Vec<TranscriptEntry>,
    scroll_manager: ScrollManager,
}

impl MessageList {
    pub fn new(_cx: &mut Context<Self>) -> Self {
        Self {
            entries: Vec::new(),
            scroll_manager: ScrollManager::new(),
        }
    }

    pub fn set_entries(&mut self, entries: Vec<TranscriptEntry>, cx: &mut Context<Self>) {
        if entries == self.entries {
            return;
        }

        if entries.len() > self.entries.len() {
            self.scroll_manager.request_scroll_to_bottom();
        } else {
            self.scroll_manager.request_scroll_to_bottom_if_following();
        }

        self.entries = entries;
        cx.notify();
    }

    fn render_entry(&self, entry: &TranscriptEntry, cx: &Context<Self>) -> AnyElement {
        let theme = cx.theme();

        let header = h_flex()
            .gap_2()
            .items_center()
            .when(entry.align_end, |row| row.flex_row_reverse())
            .child(
                Label::new(entry.speaker)
                    .text_xs()
                    .text_color(theme.foreground.opacity(0.5)),
            )
            .child(
                Label::new(entry.timestamp.clone())
                    .text_xs()
                    .text_color(theme.muted_foreground),
            );

        let bubble = div()
            .max_w(BUBBLE_MAX_WIDTH)
            .px(BUBBLE_PADDING_X)
            .py(BUBBLE_PADDING_Y)
            .rounded_lg()
            .map(|bubble| match entry.role {
                Role::User => bubble
                    .bg(theme.accent)
                    .text_color(theme.accent_foreground),
                Role::Assistant => bubble.bg(theme.muted).text_color(theme.foreground),
            })
            .child(Self::render_body(entry));

        v_flex()
            .id(SharedString::from(format!("message-{}", entry.id)))
            .w_full()
            .gap_1()
            .map(|column| {
                if entry.align_end {
                    column.items_end()
                } else {
                    column.items_start()
                }
            })
            .child(header)
            .child(bubble)
            .when(entry.in_progress, |column| {
                column.child(
                    h_flex()
                        .gap_2()
                        .items_center()
                        .child(div().size(px(8.)).rounded_full().bg(theme.primary))
                        .child(
                            Label::new("Streaming")
                                .text_xs()
                                .text_color(theme.foreground.opacity(0.65)),
                        ),
                )
            })
            .into_any_element()
    }

    fn render_body(entry: &TranscriptEntry) -> AnyElement {
        if entry.body.trim().is_empty() {
            let placeholder = if entry.in_progress {
                "Waiting for response..."
            } else {
                "(empty response)"
            };
            return Label::new(placeholder).text_sm().into_any_element();
        }

        if entry.role == Role::User || entry.body.len() > MARKDOWN_SAFE_FALLBACK_THRESHOLD_BYTES {
            return div()
                .text_sm()
                .child(entry.body.clone())
                .into_any_element();
        }

        TextView::markdown(
            ElementId::Name(SharedString::from(format!("markdown-{}", entry.id))),
            entry.body.clone(),
        )
        .selectable(true)
        .into_any_element()
    }
}

impl Render for MessageList {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        if self.entries.is_empty() {
            return v_flex()
                .id("message-list-empty")
                .size_full()
                .items_center()
                .justify_center()
                .child(
                    Label::new("Send a message to start the conversation.")
                        .text_sm()
                        .text_color(theme.muted_foreground),
                )
                .into_any_element();
        }

        // The zero-height tail is the last child, so scrolling to it pins the newest text.
        let tail_index = self.entries.len();
        self.scroll_manager.apply_pending_scroll(tail_index);

        let rows = self
            .entries
            .iter()
            .map(|entry| self.render_entry(entry, cx))
            .collect::<Vec<_>>();

        v_flex()
            .id("message-list")
            .size_full()
            .min_h_0()
            .overflow_y_scroll()
            .track_scroll(self.scroll_manager.handle())
            .px_4()
            .py_3()
            .gap_4()
            .children(rows)
            .child(div().id("message-list-tail").h(px(0.)))
            .into_any_element()
    }
}
