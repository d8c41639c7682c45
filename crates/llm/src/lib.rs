use std::sync::Arc;

mod config;
mod gemini;
mod provider;
mod stream;

pub use config::{
    CREDENTIAL_ENV_VAR, DEFAULT_GEMINI_MODEL, DEFAULT_MAX_OUTPUT_TOKENS,
    DEFAULT_STREAM_TIMEOUT_SECS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P, HarmBlockThreshold,
    HarmCategory, ModelConfig,
};
pub use gemini::{GEMINI_PROVIDER_ID, GeminiAdapter};
pub use provider::{
    ModelService, ProviderError, ProviderEventStream, ProviderResult, ProviderStreamHandle,
    ProviderWorker, StreamRequest, event_stream,
};
pub use stream::{Fragment, StreamEventMapped, StreamEventPayload, StreamTarget};

pub fn create_provider(
    provider_id: &str,
    config: ModelConfig,
) -> ProviderResult<Arc<dyn ModelService>> {
    match provider_id.trim() {
        "" | "gemini" | "google" => Ok(Arc::new(GeminiAdapter::new(config))),
        other => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: other.to_string(),
        }),
    }
}
