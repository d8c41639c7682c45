use gpui::*;
use gpui_component::Root;
use oryx_chat::{ChatOptions, ChatSession};
use oryx_llm::{GEMINI_PROVIDER_ID, create_provider};
use tracing_subscriber::EnvFilter;

use oryx::app::{APP_TITLE, ChatAppShell, ClearConversation, Quit};
use oryx::settings::SettingsStore;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = SettingsStore::load();
    tracing::info!(path = ?settings.config_path(), "settings resolved");
    let config = settings.into_config();
    let model_name = SharedString::from(config.model.clone());
    let options = ChatOptions::from_config(&config);
    let service = match create_provider(GEMINI_PROVIDER_ID, config) {
        Ok(service) => service,
        Err(error) => {
            tracing::error!(error = %error, "failed to create model service");
            std::process::exit(1);
        }
    };
    let session = ChatSession::new(service, options);

    let app = Application::new().with_assets(gpui_component_assets::Assets);

    app.run(move |cx| {
        gpui_tokio_bridge::init(cx);

        // Must run before any Root is created.
        gpui_component::init(cx);

        cx.on_action(|_: &Quit, cx| {
            cx.quit();
        });

        cx.bind_keys([
            KeyBinding::new("cmd-q", Quit, None),
            KeyBinding::new("cmd-k", ClearConversation, None),
        ]);

        cx.spawn(async move |cx| {
            cx.update(|cx| {
                let options = WindowOptions {
                    window_bounds: Some(WindowBounds::Windowed(Bounds::centered(
                        None,
                        size(px(900.), px(760.)),
                        cx,
                    ))),
                    titlebar: Some(TitlebarOptions {
                        title: Some(APP_TITLE.into()),
                        appears_transparent: true,
                        traffic_light_position: Some(point(px(9.), px(9.))),
                        ..Default::default()
                    }),
                    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
                    window_decorations: Some(WindowDecorations::Client),
                    #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
                    window_decorations: None,
                    ..Default::default()
                };

                let opened = cx.open_window(options, |window, cx| {
                    let shell =
                        cx.new(|cx| ChatAppShell::new(session, model_name, window, cx));
                    cx.new(|cx| Root::new(shell, window, cx))
                });

                match opened {
                    Ok(_) => cx.activate(true),
                    Err(error) => {
                        tracing::error!(error = %error, "failed to open main window");
                        cx.quit();
                    }
                }
            })
        })
        .detach();
    });
}
