use gpui::*;
use gpui_component::{
    ActiveTheme, Disableable, IconName, Sizable,
    button::{Button, ButtonVariants},
    input::{Input, InputEvent, InputState},
    v_flex,
};
use oryx_chat::{EnterAction, can_send, enter_action};

use crate::chat::events::Submit;

pub struct MessageInput {
    input_state: Entity<InputState>,
    busy: bool,
    pending_newline: bool,
}

impl EventEmitter<Submit> for MessageInput {}

impl MessageInput {
    pub fn new(window: &mut Window, cx: &mut Context<Self>) -> Self {
        let input_state = cx.new(|cx| {
            InputState::new(window, cx)
                .placeholder("Ask anything...")
                .auto_grow(3, 10)
        });

        cx.subscribe_in(
            &input_state,
            window,
            |this, _, event: &InputEvent, window, cx| {
                if let InputEvent::PressEnter { secondary } = event {
                    if *secondary {
                        this.pending_newline = false;
                        return;
                    }

                    if this.pending_newline {
                        // Shift+Enter already inserted the break.
                        this.pending_newline = false;
                    } else {
                        this.handle_enter(window, cx);
                    }
                }
            },
        )
        .detach();

        Self {
            input_state,
            busy: false,
            pending_newline: false,
        }
    }

    pub fn set_busy(&mut self, busy: bool, cx: &mut Context<Self>) {
        if self.busy == busy {
            return;
        }
        self.busy = busy;
        if !busy {
            self.pending_newline = false;
        }
        cx.notify();
    }

    pub fn clear(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.input_state.update(cx, |state, cx| {
            state.set_value("", window, cx);
        });
        self.pending_newline = false;
    }

    fn draft(&self, cx: &App) -> String {
        self.input_state.read(cx).value().to_string()
    }

    fn handle_enter(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let draft = self.draft(cx);
        match enter_action(&draft, false, self.busy) {
            EnterAction::Submit(content) => self.submit(content, window, cx),
            EnterAction::InsertNewline => {}
            EnterAction::Ignore => {
                if let Some(trimmed) = draft.strip_suffix('\n') {
                    self.input_state.update(cx, |state, cx| {
                        state.set_value(trimmed.to_string(), window, cx);
                    });
                }
            }
        }
    }

    fn handle_shift_enter(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let draft = self.draft(cx);
        if enter_action(&draft, true, self.busy) != EnterAction::InsertNewline {
            return;
        }

        self.pending_newline = true;
        self.input_state.update(cx, |state, cx| {
            state.insert("\n", window, cx);
        });
        cx.notify();
    }

    fn handle_send_clicked(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let draft = self.draft(cx);
        if can_send(&draft, self.busy) {
            self.submit(draft, window, cx);
        }
    }

    fn submit(&mut self, content: String, window: &mut Window, cx: &mut Context<Self>) {
        cx.emit(Submit::new(content));
        self.clear(window, cx);
    }
}

impl Render for MessageInput {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let busy = self.busy;
        let send_enabled = can_send(&self.draft(cx), busy);
        let theme = cx.theme();

        v_flex()
            .bg(theme.background)
            .gap_2()
            .p_3()
            .child(
                div()
                    .w_full()
                    .px_3()
                    .py_2()
                    .rounded_lg()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.background)
                    .on_key_down(cx.listener(|this, event: &KeyDownEvent, window, cx| {
                        if event.keystroke.key == "enter" && event.keystroke.modifiers.shift {
                            this.handle_shift_enter(window, cx);
                        }
                    }))
                    .child(Input::new(&self.input_state).w_full().disabled(busy)),
            )
            .child(
                div().w_full().flex().justify_end().child(
                    Button::new("send")
                        .small()
                        .primary()
                        .icon(IconName::ArrowUp)
                        .child("Send")
                        .disabled(!send_enabled)
                        .on_click(cx.listener(|this, _, window, cx| {
                            this.handle_send_clicked(window, cx);
                        })),
                ),
            )
    }
}
