use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use oryx_llm::{
    ModelConfig, ModelService, ProviderEventStream, StreamEventMapped, StreamEventPayload,
    StreamRequest, StreamTarget,
};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::assembler::StreamAssembler;
use crate::message::{Conversation, Message, MessageId};

/// Full, immutable conversation state published after every mutation.
pub type Snapshot = Arc<Conversation>;
pub type SnapshotReceiver = mpsc::UnboundedReceiver<Snapshot>;

pub const STREAM_CLOSED_MESSAGE: &str = "model stream ended before a terminal event";
pub const SEND_INTERRUPTED_MESSAGE: &str = "reply was interrupted before it finished";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatOptions {
    /// Longest wait for the next stream event before the send fails.
    pub stream_timeout: Option<Duration>,
}

impl ChatOptions {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            stream_timeout: config.stream_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing changed.
    Ignored(IgnoreReason),
    Completed,
    /// The error string is also stored on the conversation.
    Failed(String),
    /// The conversation was cleared while the reply was streaming.
    Superseded,
}

/// Conversation state manager.
///
/// Clones share one conversation. At most one send is in flight; `clear` invalidates it.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    service: Arc<dyn ModelService>,
    options: ChatOptions,
    state: Mutex<SessionState>,
    /// Current generation. Only written while `state` is locked.
    generation: watch::Sender<StreamTarget>,
}

#[derive(Default)]
struct SessionState {
    conversation: Conversation,
    subscribers: Vec<mpsc::UnboundedSender<Snapshot>>,
}

enum StreamEnd {
    Completed,
    Failed(String),
    Superseded,
}

impl ChatSession {
    pub fn new(service: Arc<dyn ModelService>, options: ChatOptions) -> Self {
        let (generation, _) = watch::channel(StreamTarget::default());
        Self {
            inner: Arc::new(SessionInner {
                service,
                options,
                state: Mutex::new(SessionState::default()),
                generation,
            }),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::new(self.lock().conversation.clone())
    }

    /// Returns a receiver that first yields the current snapshot, then one per mutation.
    pub fn subscribe(&self) -> SnapshotReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let _ = tx.send(Arc::new(state.conversation.clone()));
        state.subscribers.push(tx);
        rx
    }

    pub fn is_busy(&self) -> bool {
        self.lock().conversation.busy
    }

    /// Resets to an empty conversation and drops any in-flight reply.
    pub fn clear(&self) {
        let mut state = self.lock();
        let superseded = state.conversation.busy;
        state.conversation.messages.clear();
        state.conversation.error = None;
        self.inner.generation.send_modify(|target| *target = target.next());
        self.publish(&mut state);

        if superseded {
            tracing::info!("conversation cleared while a reply was streaming");
        } else {
            tracing::debug!("conversation cleared");
        }
    }

    /// Sends `text` and streams the reply into the conversation.
    ///
    /// Resolves once the reply completed, failed, or was superseded by `clear`.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let prompt = text.trim();
        if prompt.is_empty() {
            return SendOutcome::Ignored(IgnoreReason::EmptyInput);
        }

        let target = {
            let mut state = self.lock();
            if state.conversation.busy {
                tracing::debug!("send ignored while another reply is in flight");
                return SendOutcome::Ignored(IgnoreReason::Busy);
            }

            state.conversation.messages.push(Message::user(prompt));
            state.conversation.busy = true;
            state.conversation.error = None;
            self.inner.generation.send_modify(|target| *target = target.next());
            let target = *self.inner.generation.borrow();
            self.publish(&mut state);
            target
        };
        let mut guard = SendGuard::new(self, target);

        let request = StreamRequest::new(target, prompt);
        let handle = match self.inner.service.stream_generate(request) {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(
                    target = ?target,
                    provider = %self.inner.service.id(),
                    configuration = error.is_configuration(),
                    error = %error,
                    "model service rejected the request"
                );
                return guard.finish(StreamEnd::Failed(error.to_string()));
            }
        };

        let assistant_id = {
            let mut state = self.lock();
            if !self.is_current(target) {
                drop(state);
                return guard.finish(StreamEnd::Superseded);
            }
            let placeholder = Message::assistant_placeholder();
            let assistant_id = placeholder.id;
            state.conversation.messages.push(placeholder);
            self.publish(&mut state);
            assistant_id
        };
        guard.assistant_id = Some(assistant_id);

        tracing::debug!(
            target = ?target,
            model = %self.inner.service.model(),
            "streaming reply"
        );

        guard.worker = Some(tokio::spawn(handle.worker).abort_handle());
        let end = self.consume(target, assistant_id, handle.stream).await;
        guard.finish(end)
    }

    async fn consume(
        &self,
        target: StreamTarget,
        assistant_id: MessageId,
        mut stream: ProviderEventStream,
    ) -> StreamEnd {
        let mut generation = self.inner.generation.subscribe();
        let mut assembler = StreamAssembler::new();

        loop {
            if !self.is_current(target) {
                return StreamEnd::Superseded;
            }

            let next = tokio::select! {
                changed = generation.changed() => {
                    if changed.is_err() || !self.is_current(target) {
                        return StreamEnd::Superseded;
                    }
                    continue;
                }
                next = Self::next_event(&mut stream, self.inner.options.stream_timeout) => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return StreamEnd::Failed(STREAM_CLOSED_MESSAGE.to_string()),
                Err(timeout) => {
                    stream.cancel();
                    tracing::warn!(
                        target = ?target,
                        fragment_count = assembler.fragment_count(),
                        timeout = ?timeout,
                        "model stream timed out"
                    );
                    return StreamEnd::Failed(format!("model stream timed out after {timeout:?}"));
                }
            };

            if event.target != target {
                tracing::debug!(
                    target = ?target,
                    event_target = ?event.target,
                    "dropping event for a different stream"
                );
                continue;
            }

            match event.payload {
                StreamEventPayload::Fragment(fragment) => {
                    if let Some(content) = assembler.push(&fragment)
                        && !self.apply_partial(target, assistant_id, content)
                    {
                        return StreamEnd::Superseded;
                    }
                }
                StreamEventPayload::Done => {
                    tracing::debug!(
                        target = ?target,
                        fragment_count = assembler.fragment_count(),
                        content_len = assembler.content().len(),
                        "model stream completed"
                    );
                    return StreamEnd::Completed;
                }
                StreamEventPayload::Error(message) => {
                    tracing::warn!(
                        target = ?target,
                        fragment_count = assembler.fragment_count(),
                        error = %message,
                        "model stream failed"
                    );
                    return StreamEnd::Failed(message);
                }
            }
        }
    }

    async fn next_event(
        stream: &mut ProviderEventStream,
        timeout: Option<Duration>,
    ) -> Result<Option<StreamEventMapped>, Duration> {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, stream.recv())
                .await
                .map_err(|_| timeout),
            None => Ok(stream.recv().await),
        }
    }

    /// Writes the accumulated content. Returns false when the reply no longer belongs
    /// to the visible conversation.
    fn apply_partial(
        &self,
        target: StreamTarget,
        assistant_id: MessageId,
        content: &str,
    ) -> bool {
        let mut state = self.lock();
        if !self.is_current(target) {
            return false;
        }

        let Some(message) = state.conversation.find_mut(assistant_id) else {
            return false;
        };
        message.content.clear();
        message.content.push_str(content);
        self.publish(&mut state);
        true
    }

    /// Terminal bookkeeping shared by every exit path; always clears `busy`.
    fn settle(
        &self,
        target: StreamTarget,
        assistant_id: Option<MessageId>,
        end: StreamEnd,
    ) -> SendOutcome {
        let mut state = self.lock();
        let current = self.is_current(target);

        let outcome = match end {
            _ if !current => SendOutcome::Superseded,
            StreamEnd::Superseded => SendOutcome::Superseded,
            StreamEnd::Completed => {
                if let Some(message) =
                    assistant_id.and_then(|id| state.conversation.find_mut(id))
                {
                    message.streaming = false;
                }
                SendOutcome::Completed
            }
            StreamEnd::Failed(error) => {
                if let Some(id) = assistant_id {
                    let produced_nothing = state
                        .conversation
                        .find(id)
                        .is_some_and(|message| message.content.is_empty());
                    if produced_nothing {
                        state.conversation.remove(id);
                    } else if let Some(message) = state.conversation.find_mut(id) {
                        message.streaming = false;
                    }
                }
                state.conversation.error = Some(error.clone());
                SendOutcome::Failed(error)
            }
        };

        state.conversation.busy = false;
        self.publish(&mut state);
        outcome
    }

    fn is_current(&self, target: StreamTarget) -> bool {
        *self.inner.generation.borrow() == target
    }

    fn publish(&self, state: &mut SessionState) {
        let snapshot = Arc::new(state.conversation.clone());
        state
            .subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles a send that is dropped before it resolves, so `busy` never sticks.
struct SendGuard<'a> {
    session: &'a ChatSession,
    target: StreamTarget,
    assistant_id: Option<MessageId>,
    worker: Option<AbortHandle>,
    settled: bool,
}

impl<'a> SendGuard<'a> {
    fn new(session: &'a ChatSession, target: StreamTarget) -> Self {
        Self {
            session,
            target,
            assistant_id: None,
            worker: None,
            settled: false,
        }
    }

    fn finish(mut self, end: StreamEnd) -> SendOutcome {
        self.settled = true;
        self.session.settle(self.target, self.assistant_id, end)
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if self.settled {
            return;
        }

        tracing::debug!(target = ?self.target, "send dropped before the reply resolved");
        self.session.settle(
            self.target,
            self.assistant_id,
            StreamEnd::Failed(SEND_INTERRUPTED_MESSAGE.to_string()),
        );
    }
}

#[cfg(test)]
mod tests;
