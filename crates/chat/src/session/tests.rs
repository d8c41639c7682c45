use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use oryx_llm::{
    CREDENTIAL_ENV_VAR, Fragment, GeminiAdapter, ModelConfig, ModelService, ProviderError,
    ProviderResult, ProviderStreamHandle, ProviderWorker, StreamEventMapped, StreamRequest,
    event_stream,
};
use tokio::sync::{Notify, oneshot};

use super::*;
use crate::message::Role;

#[derive(Clone)]
enum Step {
    Text(&'static str),
    NoText,
    /// An event tagged with somebody else's target.
    Foreign(&'static str),
    Fail(&'static str),
    Done,
    Gate(Arc<Notify>),
    Hang,
    Close,
}

/// Replays one scripted stream per call.
#[derive(Default)]
struct ScriptedService {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    prompts: Mutex<Vec<String>>,
    cancels: Mutex<Vec<oneshot::Receiver<()>>>,
    missing_credential: bool,
}

impl ScriptedService {
    fn new(scripts: impl IntoIterator<Item = Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        })
    }

    fn without_credential() -> Arc<Self> {
        Arc::new(Self {
            missing_credential: true,
            ..Self::default()
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
    }

    /// Cancellation receiver handed out with the oldest stream not yet taken.
    fn take_cancel(&self) -> oneshot::Receiver<()> {
        self.cancels
            .lock()
            .ok()
            .filter(|cancels| !cancels.is_empty())
            .map(|mut cancels| cancels.remove(0))
            .expect("a stream was opened")
    }
}

impl ModelService for ScriptedService {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn stream_generate(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        if self.missing_credential {
            return Err(ProviderError::MissingCredential {
                stage: "scripted",
                env_var: CREDENTIAL_ENV_VAR,
            });
        }

        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front())
            .unwrap_or_default();

        let target = request.target;
        let (event_tx, stream, cancel_rx) = event_stream(target);
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.push(cancel_rx);
        }
        let worker: ProviderWorker = Box::pin(async move {
            for step in script {
                let event = match step {
                    Step::Text(text) => StreamEventMapped::fragment(target, Fragment::text(text)),
                    Step::NoText => StreamEventMapped::fragment(target, Fragment::without_text()),
                    Step::Foreign(text) => StreamEventMapped::fragment(
                        target.next().next(),
                        Fragment::text(text),
                    ),
                    Step::Fail(message) => StreamEventMapped::error(target, message),
                    Step::Done => StreamEventMapped::done(target),
                    Step::Gate(gate) => {
                        gate.notified().await;
                        continue;
                    }
                    Step::Hang => std::future::pending().await,
                    Step::Close => return,
                };
                if event_tx.send(event).is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }
        });

        Ok(ProviderStreamHandle { stream, worker })
    }
}

fn session_with(service: Arc<dyn ModelService>) -> ChatSession {
    ChatSession::new(service, ChatOptions::default())
}

async fn wait_for(
    snapshots: &mut SnapshotReceiver,
    predicate: impl Fn(&Conversation) -> bool,
) -> Snapshot {
    let wait = async {
        loop {
            match snapshots.recv().await {
                Some(snapshot) if predicate(&snapshot) => return snapshot,
                Some(_) => continue,
                None => panic!("session stopped publishing"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("expected snapshot never arrived")
}

fn drain(snapshots: &mut SnapshotReceiver) -> Vec<Snapshot> {
    let mut drained = Vec::new();
    while let Ok(snapshot) = snapshots.try_recv() {
        drained.push(snapshot);
    }
    drained
}

fn assistant_content(conversation: &Conversation) -> Option<&str> {
    conversation
        .messages
        .iter()
        .find(|message| message.role == Role::Assistant)
        .map(|message| message.content.as_str())
}

#[tokio::test]
async fn fragments_assemble_into_one_completed_reply() {
    let service = ScriptedService::new([vec![
        Step::Text("Hi"),
        Step::Text(" there"),
        Step::Text("!"),
        Step::Done,
    ]]);
    let session = session_with(service.clone());

    let outcome = session.send("Hello").await;

    assert_eq!(outcome, SendOutcome::Completed);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.messages[0].content, "Hello");
    assert_eq!(snapshot.messages[1].role, Role::Assistant);
    assert_eq!(snapshot.messages[1].content, "Hi there!");
    assert!(!snapshot.messages[1].streaming);
    assert!(!snapshot.busy);
    assert_eq!(snapshot.error, None);
    assert_eq!(service.prompts(), ["Hello"]);
}

#[tokio::test]
async fn blank_input_changes_nothing() {
    let service = ScriptedService::new([]);
    let session = session_with(service.clone());

    assert_eq!(
        session.send("").await,
        SendOutcome::Ignored(IgnoreReason::EmptyInput)
    );
    assert_eq!(
        session.send("   ").await,
        SendOutcome::Ignored(IgnoreReason::EmptyInput)
    );

    let snapshot = session.snapshot();
    assert!(snapshot.is_empty());
    assert!(!snapshot.busy);
    assert!(service.prompts().is_empty());
}

#[tokio::test]
async fn user_text_is_trimmed_before_sending() {
    let service = ScriptedService::new([vec![Step::Text("ok"), Step::Done]]);
    let session = session_with(service.clone());

    session.send("  Hello\n").await;

    assert_eq!(session.snapshot().messages[0].content, "Hello");
    assert_eq!(service.prompts(), ["Hello"]);
}

#[tokio::test]
async fn second_send_is_ignored_while_busy() {
    let gate = Arc::new(Notify::new());
    let service = ScriptedService::new([vec![
        Step::Text("a"),
        Step::Gate(gate.clone()),
        Step::Text("b"),
        Step::Done,
    ]]);
    let session = session_with(service.clone());
    let mut snapshots = session.subscribe();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.send("one").await }
    });
    wait_for(&mut snapshots, |conversation| {
        assistant_content(conversation) == Some("a")
    })
    .await;

    assert!(session.is_busy());
    assert_eq!(
        session.send("two").await,
        SendOutcome::Ignored(IgnoreReason::Busy)
    );
    assert_eq!(session.snapshot().len(), 2);

    gate.notify_one();
    assert_eq!(first.await.ok(), Some(SendOutcome::Completed));
    assert_eq!(assistant_content(&session.snapshot()), Some("ab"));
    assert_eq!(service.prompts(), ["one"]);
}

#[tokio::test]
async fn observers_see_monotonically_growing_content() {
    let service = ScriptedService::new([vec![
        Step::Text("Hi"),
        Step::NoText,
        Step::Text(" there"),
        Step::Text("!"),
        Step::Done,
    ]]);
    let session = session_with(service);
    let mut snapshots = session.subscribe();

    session.send("Hello").await;

    let history = drain(&mut snapshots);
    let contents = history
        .iter()
        .filter_map(|snapshot| assistant_content(snapshot))
        .collect::<Vec<_>>();

    assert_eq!(contents.first().copied(), Some(""));
    assert_eq!(contents.last().copied(), Some("Hi there!"));
    assert!(
        contents
            .windows(2)
            .all(|pair| pair[1].starts_with(pair[0]))
    );
    assert!(contents.contains(&"Hi there"));

    // Insertion order never changes.
    for snapshot in history.iter().filter(|snapshot| snapshot.len() == 2) {
        assert_eq!(snapshot.messages[0].role, Role::User);
        assert_eq!(snapshot.messages[1].role, Role::Assistant);
    }

    // Only the final snapshot has the reply frozen and the busy flag down.
    let last = history.last().expect("at least one snapshot");
    assert!(!last.busy);
    assert!(last.streaming_message().is_none());
    assert!(
        history[..history.len() - 1]
            .iter()
            .filter(|snapshot| snapshot.len() == 2)
            .all(|snapshot| snapshot.messages[1].streaming)
    );
}

#[tokio::test]
async fn failure_before_any_fragment_drops_the_placeholder() {
    let service = ScriptedService::new([vec![Step::Fail("upstream unavailable")]]);
    let session = session_with(service);

    let outcome = session.send("Hello").await;

    assert_eq!(outcome, SendOutcome::Failed("upstream unavailable".to_string()));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.error.as_deref(), Some("upstream unavailable"));
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn failure_after_a_fragment_keeps_partial_output() {
    let service = ScriptedService::new([vec![
        Step::Text("partial"),
        Step::Fail("connection reset"),
    ]]);
    let session = session_with(service);

    session.send("Hello").await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.messages[1].content, "partial");
    assert!(!snapshot.messages[1].streaming);
    assert_eq!(snapshot.error.as_deref(), Some("connection reset"));
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn missing_credential_reports_a_configuration_error() {
    let session = session_with(ScriptedService::without_credential());
    let mut snapshots = session.subscribe();

    let outcome = session.send("Hello").await;

    let expected = format!("{CREDENTIAL_ENV_VAR} environment variable is required");
    assert_eq!(outcome, SendOutcome::Failed(expected.clone()));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.error.as_deref(), Some(expected.as_str()));
    assert!(!snapshot.busy);
    assert!(
        drain(&mut snapshots)
            .iter()
            .all(|snapshot| assistant_content(snapshot).is_none())
    );
}

#[tokio::test]
async fn gemini_without_credential_fails_before_the_network() {
    let session = session_with(Arc::new(GeminiAdapter::new(ModelConfig::default())));

    let outcome = session.send("Hello").await;

    assert!(matches!(
        outcome,
        SendOutcome::Failed(message) if message.contains(CREDENTIAL_ENV_VAR)
    ));
    assert_eq!(session.snapshot().len(), 1);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn next_send_clears_the_previous_error() {
    let service = ScriptedService::new([
        vec![Step::Fail("boom")],
        vec![Step::Text("ok"), Step::Done],
    ]);
    let session = session_with(service);

    session.send("first").await;
    assert_eq!(session.snapshot().error.as_deref(), Some("boom"));

    assert_eq!(session.send("second").await, SendOutcome::Completed);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.last().map(|message| message.content.as_str()), Some("ok"));
}

#[tokio::test]
async fn clear_is_idempotent() {
    let service = ScriptedService::new([vec![Step::Fail("boom")]]);
    let session = session_with(service);
    session.send("Hello").await;
    assert!(session.snapshot().error.is_some());

    session.clear();
    let once = session.snapshot();
    session.clear();
    let twice = session.snapshot();

    assert_eq!(*once, Conversation::new());
    assert_eq!(once, twice);
}

#[tokio::test]
async fn clear_during_a_stream_supersedes_the_reply() {
    let gate = Arc::new(Notify::new());
    let service = ScriptedService::new([
        vec![
            Step::Text("Hi"),
            Step::Gate(gate.clone()),
            Step::Text(" late"),
            Step::Done,
        ],
        vec![Step::Text("fresh"), Step::Done],
    ]);
    let session = session_with(service);
    let mut snapshots = session.subscribe();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send("Hello").await }
    });
    wait_for(&mut snapshots, |conversation| {
        assistant_content(conversation) == Some("Hi")
    })
    .await;

    session.clear();
    gate.notify_one();

    assert_eq!(pending.await.ok(), Some(SendOutcome::Superseded));
    let snapshot = session.snapshot();
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.error, None);
    assert!(!snapshot.busy);
    assert!(
        drain(&mut snapshots)
            .iter()
            .all(|snapshot| snapshot.is_empty())
    );

    assert_eq!(session.send("again").await, SendOutcome::Completed);
    assert_eq!(assistant_content(&session.snapshot()), Some("fresh"));
}

#[tokio::test]
async fn clear_unblocks_a_hung_stream() {
    let service = ScriptedService::new([vec![Step::Text("stuck"), Step::Hang]]);
    let session = session_with(service);
    let mut snapshots = session.subscribe();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send("Hello").await }
    });
    wait_for(&mut snapshots, |conversation| {
        assistant_content(conversation) == Some("stuck")
    })
    .await;

    session.clear();

    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .ok()
        .and_then(Result::ok);
    assert_eq!(outcome, Some(SendOutcome::Superseded));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn clear_cancels_the_upstream_stream() {
    let service = ScriptedService::new([vec![Step::Text("stuck"), Step::Hang]]);
    let session = session_with(service.clone());
    let mut snapshots = session.subscribe();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send("Hello").await }
    });
    wait_for(&mut snapshots, |conversation| {
        assistant_content(conversation) == Some("stuck")
    })
    .await;
    let mut cancel_rx = service.take_cancel();
    assert!(cancel_rx.try_recv().is_err());

    session.clear();

    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .ok()
        .and_then(Result::ok);
    assert_eq!(outcome, Some(SendOutcome::Superseded));
    assert!(cancel_rx.try_recv().is_ok());
}

#[tokio::test]
async fn dropped_send_releases_the_busy_flag() {
    let service = ScriptedService::new([
        vec![Step::Hang],
        vec![Step::Text("fresh"), Step::Done],
    ]);
    let session = session_with(service.clone());

    let abandoned = tokio::time::timeout(Duration::from_millis(50), session.send("Hello")).await;

    assert!(abandoned.is_err());
    let snapshot = session.snapshot();
    assert!(!snapshot.busy);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.error.as_deref(), Some(SEND_INTERRUPTED_MESSAGE));
    assert!(service.take_cancel().try_recv().is_ok());

    assert_eq!(session.send("again").await, SendOutcome::Completed);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.error, None);
    assert_eq!(assistant_content(&snapshot), Some("fresh"));
    assert_eq!(service.prompts(), ["Hello", "again"]);
}

#[tokio::test]
async fn dropped_send_keeps_partial_output_and_clear_still_works() {
    let service = ScriptedService::new([vec![Step::Text("partial"), Step::Hang]]);
    let session = session_with(service);
    let mut snapshots = session.subscribe();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send("Hello").await }
    });
    wait_for(&mut snapshots, |conversation| {
        assistant_content(conversation) == Some("partial")
    })
    .await;
    pending.abort();
    wait_for(&mut snapshots, |conversation| !conversation.busy).await;

    let snapshot = session.snapshot();
    assert_eq!(assistant_content(&snapshot), Some("partial"));
    assert!(snapshot.streaming_message().is_none());
    assert_eq!(snapshot.error.as_deref(), Some(SEND_INTERRUPTED_MESSAGE));

    session.clear();
    assert_eq!(*session.snapshot(), Conversation::new());
}

#[tokio::test]
async fn stream_closing_without_terminal_event_is_an_error() {
    let service = ScriptedService::new([vec![Step::Text("x"), Step::Close]]);
    let session = session_with(service);

    let outcome = session.send("Hello").await;

    assert_eq!(outcome, SendOutcome::Failed(STREAM_CLOSED_MESSAGE.to_string()));
    let snapshot = session.snapshot();
    assert_eq!(assistant_content(&snapshot), Some("x"));
    assert_eq!(snapshot.error.as_deref(), Some(STREAM_CLOSED_MESSAGE));
}

#[tokio::test]
async fn idle_stream_times_out() {
    let service = ScriptedService::new([vec![Step::Hang]]);
    let session = ChatSession::new(
        service,
        ChatOptions {
            stream_timeout: Some(Duration::from_millis(50)),
        },
    );

    let outcome = session.send("Hello").await;

    assert!(matches!(
        &outcome,
        SendOutcome::Failed(message) if message.starts_with("model stream timed out")
    ));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn events_for_other_streams_are_ignored() {
    let service = ScriptedService::new([vec![
        Step::Foreign("stale"),
        Step::Text("fresh"),
        Step::Done,
    ]]);
    let session = session_with(service);

    session.send("Hello").await;

    assert_eq!(assistant_content(&session.snapshot()), Some("fresh"));
}

#[test]
fn options_follow_the_model_config_timeout() {
    let config = ModelConfig {
        stream_timeout_secs: Some(7),
        ..ModelConfig::default()
    };

    assert_eq!(
        ChatOptions::from_config(&config).stream_timeout,
        Some(Duration::from_secs(7))
    );
}
