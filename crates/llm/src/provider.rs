use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::stream::{StreamEventMapped, StreamTarget};

/// One generation request: a single text input, no history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub prompt: String,
}

impl StreamRequest {
    pub fn new(target: StreamTarget, prompt: impl Into<String>) -> Self {
        Self {
            target,
            prompt: prompt.into(),
        }
    }
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("{env_var} environment variable is required"))]
    MissingCredential {
        stage: &'static str,
        env_var: &'static str,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request for {target:?} has an empty prompt"))]
    EmptyPrompt {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("failed to encode request on `{stage}`, {source}"))]
    EncodeRequest {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to build request on `{stage}`, {message}"))]
    BuildRequest {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("gemini returned an error on `{stage}`, {message}"))]
    Upstream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("model stream failed on `{stage}`, {source}"))]
    StreamFailed {
        stage: &'static str,
        source: rig::http_client::Error,
    },
}

impl ProviderError {
    /// Configuration errors are fatal to the attempt and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential { .. } | Self::UnsupportedProvider { .. }
        )
    }
}

pub struct ProviderEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// A receiving end plus the worker that feeds it. The caller must drive `worker`.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEventMapped>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Opaque streaming text generator.
pub trait ModelService: Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> &str;
    fn stream_generate(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

/// Builds the channel triple a [`ModelService`] implementation feeds from its worker.
pub fn event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}
