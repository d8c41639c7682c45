use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 65_535;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;

/// Environment variable the desktop app reads the credential from.
pub const CREDENTIAL_ENV_VAR: &str = "GOOGLE_CLOUD_API_KEY";

/// Content-safety category understood by the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
}

impl HarmCategory {
    pub const ALL: [Self; 4] = [
        Self::HateSpeech,
        Self::DangerousContent,
        Self::SexuallyExplicit,
        Self::Harassment,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::HateSpeech => "HARM_CATEGORY_HATE_SPEECH",
            Self::DangerousContent => "HARM_CATEGORY_DANGEROUS_CONTENT",
            Self::SexuallyExplicit => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            Self::Harassment => "HARM_CATEGORY_HARASSMENT",
        }
    }
}

/// Blocking level applied to one [`HarmCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    Off,
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

impl HarmBlockThreshold {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::BlockNone => "BLOCK_NONE",
            Self::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
            Self::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
            Self::BlockLowAndAbove => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

/// Everything needed to open a generation stream, injected at construction.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub credential: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_safety_thresholds")]
    pub safety_thresholds: BTreeMap<HarmCategory, HarmBlockThreshold>,
    #[serde(default)]
    pub retrieval_source: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            safety_thresholds: default_safety_thresholds(),
            retrieval_source: None,
            endpoint: None,
            stream_timeout_secs: default_stream_timeout_secs(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ModelConfig")
            .field("credential", &if self.has_credential() { "<set>" } else { "<unset>" })
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("safety_thresholds", &self.safety_thresholds)
            .field("retrieval_source", &self.retrieval_source)
            .field("endpoint", &self.endpoint)
            .field("stream_timeout_secs", &self.stream_timeout_secs)
            .finish()
    }
}

impl ModelConfig {
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = credential.into();
        self
    }

    pub fn has_credential(&self) -> bool {
        !self.credential.trim().is_empty()
    }

    /// Idle timeout between stream events. `Some(0)` and `None` both disable it.
    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Trims free-form fields and drops blank optional values.
    pub fn normalized(mut self) -> Self {
        self.credential = self.credential.trim().to_string();
        self.model = match self.model.trim() {
            "" => default_model(),
            model => model.to_string(),
        };
        self.retrieval_source = non_blank(self.retrieval_source);
        self.endpoint = non_blank(self.endpoint);
        self
    }

    /// Full `streamGenerateContent` body for one single-turn prompt.
    pub fn request_body(&self, prompt: &str) -> Value {
        let mut body = self.generation_params();
        if let Value::Object(fields) = &mut body {
            fields.insert(
                "contents".to_string(),
                json!([{
                    "role": "user",
                    "parts": [{ "text": prompt }],
                }]),
            );
        }
        body
    }

    fn generation_params(&self) -> Value {
        let mut params = Map::new();

        params.insert(
            "generationConfig".to_string(),
            json!({
                "maxOutputTokens": self.max_output_tokens,
                "temperature": self.temperature,
                "topP": self.top_p,
            }),
        );

        let safety_settings = self
            .safety_thresholds
            .iter()
            .map(|(category, threshold)| {
                json!({
                    "category": category.wire_name(),
                    "threshold": threshold.wire_name(),
                })
            })
            .collect::<Vec<_>>();
        if !safety_settings.is_empty() {
            params.insert("safetySettings".to_string(), Value::Array(safety_settings));
        }

        if let Some(datastore) = &self.retrieval_source {
            params.insert(
                "tools".to_string(),
                json!([{
                    "retrieval": {
                        "vertexAiSearch": { "datastore": datastore }
                    }
                }]),
            );
        }

        Value::Object(params)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_max_output_tokens() -> u64 {
    DEFAULT_MAX_OUTPUT_TOKENS
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

fn default_stream_timeout_secs() -> Option<u64> {
    Some(DEFAULT_STREAM_TIMEOUT_SECS)
}

fn default_safety_thresholds() -> BTreeMap<HarmCategory, HarmBlockThreshold> {
    HarmCategory::ALL
        .into_iter()
        .map(|category| (category, HarmBlockThreshold::Off))
        .collect()
}
