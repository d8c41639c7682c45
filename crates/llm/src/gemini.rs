use futures::StreamExt;
use rig::http_client::Request;
use rig::http_client::sse::{Event, GenericEventSource};
use rig::providers::gemini;
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::config::{CREDENTIAL_ENV_VAR, ModelConfig};
use super::provider::{
    EmptyPromptSnafu, EncodeRequestSnafu, HttpClientSnafu, MissingCredentialSnafu, ModelService,
    ProviderError, ProviderResult, ProviderStreamHandle, ProviderWorker, StreamRequest,
    event_stream,
};
use super::stream::{Fragment, StreamEventMapped, StreamTarget};

pub const GEMINI_PROVIDER_ID: &str = "gemini";

/// One `data:` payload of a `streamGenerateContent` SSE response.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamChunk {
    candidates: Vec<Candidate>,
    error: Option<ChunkError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ContentPart>,
}

/// Only plain text is surfaced; function calls and other part kinds are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContentPart {
    text: Option<String>,
    thought: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChunkError {
    status: Option<String>,
    message: String,
}

impl ChunkError {
    fn describe(&self) -> String {
        match &self.status {
            Some(status) => format!("{status}: {}", self.message),
            None => self.message.clone(),
        }
    }
}

pub struct GeminiAdapter {
    config: ModelConfig,
}

impl GeminiAdapter {
    /// The credential is checked per request so a missing key surfaces on send.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    fn build_client(config: &ModelConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.credential.as_str());
        if let Some(endpoint) = &config.endpoint {
            builder = builder.base_url(endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    /// Posts [`ModelConfig::request_body`] as is. rig's completion body always sends
    /// `safetySettings: null`.
    fn build_stream_request(
        client: &gemini::Client,
        config: &ModelConfig,
        prompt: &str,
    ) -> ProviderResult<Request<Vec<u8>>> {
        let body = serde_json::to_vec(&config.request_body(prompt)).context(EncodeRequestSnafu {
            stage: "encode-request",
        })?;

        client
            .post_sse(format!(
                "/v1beta/models/{}:streamGenerateContent",
                config.model
            ))
            .context(HttpClientSnafu {
                stage: "build-stream-request",
            })?
            .header("Content-Type", "application/json")
            .body(body)
            .map_err(|error| ProviderError::BuildRequest {
                stage: "build-stream-request",
                message: error.to_string(),
            })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: ProviderError,
    ) {
        let _ = event_tx.send(StreamEventMapped::error(target, error.to_string()));
    }

    fn map_part(part: ContentPart) -> Fragment {
        match part.text {
            Some(text) if !part.thought => Fragment::text(text),
            // Reasoning and function calls have no visible delta.
            _ => Fragment::without_text(),
        }
    }

    /// Returns the fragments carried by one chunk and whether the candidate finished.
    fn map_chunk(chunk: StreamChunk) -> (Vec<Fragment>, bool) {
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            // Usage-only trailer.
            return (vec![Fragment::without_text()], false);
        };

        let finished = candidate.finish_reason.is_some();
        let mut fragments = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .map(Self::map_part)
            .collect::<Vec<_>>();
        if fragments.is_empty() {
            fragments.push(Fragment::without_text());
        }

        (fragments, finished)
    }

    async fn run_stream_worker(
        config: ModelConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        let prepared = Self::build_client(&config).and_then(|client| {
            let stream_request = Self::build_stream_request(&client, &config, &request.prompt)?;
            Ok((client, stream_request))
        });
        let (client, stream_request) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    model = %config.model,
                    error = %error,
                    "failed to prepare gemini request"
                );
                Self::emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let mut source = GenericEventSource::new(client, stream_request);
        let mut fragment_count = 0_usize;

        loop {
            let next = tokio::select! {
                _ = &mut cancel_rx => {
                    source.close();
                    tracing::debug!(target = ?target, fragment_count, "gemini stream cancelled");
                    return;
                }
                next = source.next() => next,
            };

            let message = match next {
                Some(Ok(Event::Open)) => {
                    tracing::debug!(
                        target = ?target,
                        model = %config.model,
                        "gemini stream opened"
                    );
                    continue;
                }
                Some(Ok(Event::Message(message))) => message,
                Some(Err(source_error)) => {
                    source.close();
                    tracing::warn!(
                        target = ?target,
                        fragment_count,
                        error = %source_error,
                        "gemini stream failed"
                    );
                    let error = ProviderError::StreamFailed {
                        stage: "read-stream",
                        source: source_error,
                    };
                    Self::emit_error_event(&event_tx, target, error);
                    return;
                }
                None => break,
            };

            if message.data.trim().is_empty() {
                continue;
            }

            let chunk = match serde_json::from_str::<StreamChunk>(&message.data) {
                Ok(chunk) => chunk,
                Err(error) => {
                    tracing::warn!(
                        target = ?target,
                        error = %error,
                        "skipping unreadable gemini chunk"
                    );
                    continue;
                }
            };

            if let Some(failure) = &chunk.error {
                source.close();
                tracing::warn!(
                    target = ?target,
                    fragment_count,
                    error = %failure.describe(),
                    "gemini stream emitted an error chunk"
                );
                let error = ProviderError::Upstream {
                    stage: "stream-chunk",
                    message: failure.describe(),
                };
                Self::emit_error_event(&event_tx, target, error);
                return;
            }

            let (fragments, finished) = Self::map_chunk(chunk);
            for fragment in fragments {
                fragment_count += 1;
                if event_tx
                    .send(StreamEventMapped::fragment(target, fragment))
                    .is_err()
                {
                    source.close();
                    return;
                }
            }

            if finished {
                break;
            }
        }

        source.close();
        tracing::debug!(target = ?target, fragment_count, "gemini stream finished");
        let _ = event_tx.send(StreamEventMapped::done(target));
    }
}

impl ModelService for GeminiAdapter {
    fn id(&self) -> &str {
        GEMINI_PROVIDER_ID
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn stream_generate(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            self.config.has_credential(),
            MissingCredentialSnafu {
                stage: "stream-generate",
                env_var: CREDENTIAL_ENV_VAR,
            }
        );
        ensure!(
            !request.prompt.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "stream-generate",
                target: request.target,
            }
        );

        let (event_tx, stream, cancel_rx) = event_stream(request.target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}
