use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use oryx_llm::{CREDENTIAL_ENV_VAR, ModelConfig};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "oryx";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Prefix for per-field overrides, e.g. `ORYX_MODEL` or `ORYX_STREAM_TIMEOUT_SECS`.
pub const ENV_PREFIX: &str = "ORYX_";

/// Read-only model settings resolved once at startup.
///
/// Sources, lowest priority first: built-in defaults, the JSON settings file,
/// `ORYX_*` variables (nested keys split on `__`), then the credential variable.
pub struct SettingsStore {
    config: ModelConfig,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".oryx"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let config = Self::load_from_disk(&config_path);
        Self {
            config,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn into_config(self) -> ModelConfig {
        self.config
    }

    /// Resolves every source, failing on malformed input.
    pub fn extract(path: &Path) -> Result<ModelConfig, SettingsError> {
        Self::figment(Some(path))
            .extract::<ModelConfig>()
            .map(ModelConfig::normalized)
            .map_err(Box::new)
            .context(ExtractSnafu {
                stage: "extract-settings",
                path: path.to_path_buf(),
            })
    }

    fn load_from_disk(path: &Path) -> ModelConfig {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        let config = match Self::extract(path) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(error = %error, "ignoring settings file");
                Self::environment_only()
            }
        };

        if !config.has_credential() {
            tracing::warn!(
                env_var = CREDENTIAL_ENV_VAR,
                "no model credential configured, sends will fail until it is set"
            );
        }
        tracing::debug!(config = ?config, "settings loaded");
        config
    }

    fn environment_only() -> ModelConfig {
        match Self::figment(None).extract::<ModelConfig>() {
            Ok(config) => config.normalized(),
            Err(error) => {
                tracing::warn!(error = %error, "ignoring environment overrides");
                ModelConfig::default()
            }
        }
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ModelConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&[CREDENTIAL_ENV_VAR])
                    .map(|_| "credential".into()),
            )
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to load settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        source: Box<figment::Error>,
    },
}
