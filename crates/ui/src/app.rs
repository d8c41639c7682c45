use gpui::*;
use gpui_component::{ActiveTheme, h_flex, label::Label, v_flex};
use oryx_chat::ChatSession;

use crate::chat::ChatView;

pub const APP_TITLE: &str = "Oryx";

#[cfg(target_os = "macos")]
const WINDOW_TOOLBAR_LEFT_SAFE_PADDING: f32 = 78.0;
#[cfg(not(target_os = "macos"))]
const WINDOW_TOOLBAR_LEFT_SAFE_PADDING: f32 = 16.0;

gpui::actions!(shell, [ClearConversation, Quit]);

/// Title bar height that follows the user's rem size.
fn window_toolbar_height(window: &Window) -> Pixels {
    (1.75 * window.rem_size()).max(px(34.0))
}

/// Root layout: draggable title bar above the chat view.
pub struct ChatAppShell {
    chat_view: Entity<ChatView>,
    title_bar_should_move: bool,
}

impl ChatAppShell {
    pub fn new(
        session: ChatSession,
        model_name: SharedString,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let chat_view = cx.new(|cx| ChatView::new(session, model_name, window, cx));

        Self {
            chat_view,
            title_bar_should_move: false,
        }
    }

    fn clear_conversation(&mut self, cx: &mut Context<Self>) {
        self.chat_view
            .update(cx, |chat_view, cx| chat_view.clear_conversation(cx));
    }

    fn render_top_bar(&self, toolbar_height: Pixels, cx: &Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        h_flex()
            .id("app-top-bar")
            .window_control_area(WindowControlArea::Drag)
            .on_mouse_down_out(cx.listener(|this, _, _window, _cx| {
                this.title_bar_should_move = false;
            }))
            .on_mouse_up(
                MouseButton::Left,
                cx.listener(|this, _, _window, _cx| {
                    this.title_bar_should_move = false;
                }),
            )
            .on_mouse_down(
                MouseButton::Left,
                cx.listener(|this, _, _window, _cx| {
                    this.title_bar_should_move = true;
                }),
            )
            .on_mouse_move(cx.listener(|this, _, window, _cx| {
                if this.title_bar_should_move {
                    this.title_bar_should_move = false;
                    window.start_window_move();
                }
            }))
            .w_full()
            .h(toolbar_height)
            .flex_shrink_0()
            .pl(px(WINDOW_TOOLBAR_LEFT_SAFE_PADDING))
            .pr_4()
            .items_center()
            .bg(theme.background)
            .border_b_1()
            .border_color(theme.border)
            .child(Label::new(APP_TITLE).text_sm().text_color(theme.foreground))
    }
}

impl Render for ChatAppShell {
    fn render(&mut self, window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let toolbar_height = window_toolbar_height(window);

        div()
            .size_full()
            .relative()
            .bg(theme.background)
            .on_action(cx.listener(|this, _: &ClearConversation, _window, cx| {
                this.clear_conversation(cx);
            }))
            .child(
                v_flex()
                    .size_full()
                    .child(self.render_top_bar(toolbar_height, cx))
                    .child(
                        v_flex()
                            .id("main-content")
                            .flex_1()
                            .min_w_0()
                            .min_h_0()
                            .overflow_hidden()
                            .child(self.chat_view.clone()),
                    ),
            )
    }
}
