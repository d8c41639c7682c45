use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    label::Label,
    v_flex,
};
use gpui_tokio_bridge::Tokio;
use oryx_chat::{ChatSession, SendOutcome, Snapshot, Transcript, render};

use crate::chat::events::Submit;
use crate::chat::{MessageInput, MessageList};

/// Owns the conversation session and mirrors its snapshots into the widgets.
pub struct ChatView {
    session: ChatSession,
    model_name: SharedString,
    transcript: Transcript,
    message_list: Entity<MessageList>,
    message_input: Entity<MessageInput>,
    _snapshot_task: Task<()>,
}

impl ChatView {
    pub fn new(
        session: ChatSession,
        model_name: impl Into<SharedString>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let message_list = cx.new(MessageList::new);
        let message_input = cx.new(|cx| MessageInput::new(window, cx));

        cx.subscribe(&message_input, |this, _, event: &Submit, cx| {
            this.handle_submit(event.content.clone(), cx);
        })
        .detach();

        let snapshot_task = Self::spawn_snapshot_reader(&session, cx);

        Self {
            session,
            model_name: model_name.into(),
            transcript: Transcript::default(),
            message_list,
            message_input,
            _snapshot_task: snapshot_task,
        }
    }

    pub fn clear_conversation(&mut self, _cx: &mut Context<Self>) {
        self.session.clear();
    }

    fn spawn_snapshot_reader(session: &ChatSession, cx: &mut Context<Self>) -> Task<()> {
        let mut snapshots = session.subscribe();

        cx.spawn(async move |this, cx| {
            while let Some(snapshot) = snapshots.recv().await {
                let updated = this.update(cx, |this, cx| {
                    this.apply_snapshot(&snapshot, cx);
                });
                if updated.is_err() {
                    break;
                }
            }
        })
    }

    fn apply_snapshot(&mut self, snapshot: &Snapshot, cx: &mut Context<Self>) {
        let transcript = render(snapshot);
        if transcript == self.transcript {
            return;
        }

        let busy = transcript.busy;
        let entries = transcript.entries.clone();
        self.message_list.update(cx, |list, cx| {
            list.set_entries(entries, cx);
        });
        self.message_input.update(cx, |input, cx| {
            input.set_busy(busy, cx);
        });

        self.transcript = transcript;
        cx.notify();
    }

    fn handle_submit(&mut self, content: String, cx: &mut Context<Self>) {
        let session = self.session.clone();

        Tokio::spawn(cx, async move {
            match session.send(&content).await {
                SendOutcome::Failed(error) => {
                    tracing::warn!(error = %error, "reply failed");
                }
                outcome => {
                    tracing::debug!(outcome = ?outcome, "send finished");
                }
            }
        })
        .detach();
    }

    fn render_error_banner(&self, error: SharedString, cx: &Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        h_flex()
            .id("chat-view-error")
            .w_full()
            .gap_2()
            .px_4()
            .py_2()
            .items_center()
            .border_b_1()
            .border_color(theme.border)
            .bg(theme.danger.opacity(0.1))
            .child(
                Label::new(error)
                    .text_sm()
                    .text_color(theme.danger),
            )
    }

    fn render_header(&self, cx: &Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        h_flex()
            .id("chat-view-header")
            .w_full()
            .flex_shrink_0()
            .px_4()
            .py_2()
            .gap_2()
            .items_center()
            .justify_between()
            .border_b_1()
            .border_color(theme.border)
            .child(
                div()
                    .id("chat-view-model-name")
                    .px_2()
                    .py_1()
                    .rounded_full()
                    .bg(theme.muted)
                    .border_1()
                    .border_color(theme.border)
                    .text_xs()
                    .text_color(theme.muted_foreground)
                    .child(self.model_name.clone()),
            )
            .when(self.transcript.clear_visible, |header| {
                header.child(
                    Button::new("clear-conversation")
                        .ghost()
                        .small()
                        .icon(IconName::CircleX)
                        .child("Clear")
                        .on_click(cx.listener(|this, _, _window, cx| {
                            this.clear_conversation(cx);
                        })),
                )
            })
    }
}

impl Render for ChatView {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let error_banner = self.transcript.error_banner.clone().map(SharedString::from);

        v_flex()
            .id("chat-view")
            .relative()
            .size_full()
            .min_h_0()
            .overflow_hidden()
            .bg(theme.background)
            .child(self.render_header(cx))
            .when_some(error_banner, |view, error| {
                view.child(self.render_error_banner(error, cx))
            })
            .child(
                div()
                    .id("chat-view-message-list")
                    .flex_1()
                    .min_h_0()
                    .child(self.message_list.clone()),
            )
            .child(
                div()
                    .id("chat-view-message-input")
                    .flex_shrink_0()
                    .w_full()
                    .border_t_1()
                    .border_color(theme.border)
                    .child(self.message_input.clone()),
            )
    }
}
