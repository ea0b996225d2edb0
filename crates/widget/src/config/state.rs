use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chatlet_llm::{TransportConfig, TransportError};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu, ensure};
use url::Url;

pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:3001/api/chat";
pub const DEFAULT_WELCOME_MESSAGE: &str = "Hello! How can I help you today?";
pub const CONFIG_DIRECTORY_NAME: &str = "chatlet";
pub const CONFIG_FILE_NAME: &str = "widget.json";
pub const ENV_PREFIX: &str = "CHATLET_";

/// Visual variant applied by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Default,
    Dark,
    Ocean,
    Sunset,
}

impl Theme {
    /// Cycle order used by the theme button.
    pub const ALL: [Theme; 4] = [Theme::Default, Theme::Dark, Theme::Ocean, Theme::Sunset];

    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Dark => "dark",
            Self::Ocean => "ocean",
            Self::Sunset => "sunset",
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|theme| *theme == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    #[serde(default = "default_enabled", alias = "enableVoiceInput")]
    pub voice_input_enabled: bool,
    #[serde(default = "default_enabled")]
    pub streaming_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_idle_timeout_secs: Option<u64>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            theme: Theme::default(),
            welcome_message: default_welcome_message(),
            voice_input_enabled: default_enabled(),
            streaming_enabled: default_enabled(),
            auth_token: None,
            stream_idle_timeout_secs: None,
        }
    }
}

/// Partial configuration; only the fields that are set override.
///
/// Accepts the camelCase keys hosts use and the snake_case keys that
/// `CHATLET_*` variables turn into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfigPatch {
    #[serde(
        default,
        alias = "api_endpoint",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(
        default,
        alias = "welcome_message",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub welcome_message: Option<String>,
    #[serde(
        default,
        alias = "enableVoiceInput",
        alias = "voice_input_enabled",
        alias = "enable_voice_input",
        skip_serializing_if = "Option::is_none"
    )]
    pub voice_input_enabled: Option<bool>,
    #[serde(
        default,
        alias = "streaming_enabled",
        skip_serializing_if = "Option::is_none"
    )]
    pub streaming_enabled: Option<bool>,
    #[serde(
        default,
        alias = "auth_token",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_token: Option<String>,
    #[serde(
        default,
        alias = "stream_idle_timeout_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_idle_timeout_secs: Option<u64>,
}

impl WidgetConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = Some(message.into());
        self
    }

    pub fn with_voice_input(mut self, enabled: bool) -> Self {
        self.voice_input_enabled = Some(enabled);
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = Some(enabled);
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Layers `over` on top of `self`; fields set in `over` win.
    pub fn layered(&self, over: &WidgetConfigPatch) -> ConfigResult<Self> {
        Figment::from(Serialized::defaults(self))
            .merge(Serialized::defaults(over))
            .extract()
            .context(ExtractSnafu {
                stage: "layer-config-patches",
            })
    }
}

impl WidgetConfig {
    /// Merges `patch` over the built-in defaults and validates the result.
    pub fn from_patch(patch: &WidgetConfigPatch) -> ConfigResult<Self> {
        Self::default().merged(patch)
    }

    /// Merges `patch` over this configuration and validates the result.
    pub fn merged(&self, patch: &WidgetConfigPatch) -> ConfigResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(self))
            .merge(Serialized::defaults(patch))
            .extract()
            .context(ExtractSnafu {
                stage: "merge-config-patch",
            })?;

        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    pub fn normalized(mut self) -> Self {
        self.api_endpoint = self.api_endpoint.trim().to_string();
        self.auth_token = self
            .auth_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self.stream_idle_timeout_secs = self.stream_idle_timeout_secs.filter(|secs| *secs > 0);
        self
    }

    /// Refuses configurations that would send chat requests nowhere.
    pub fn validate(&self) -> ConfigResult<()> {
        self.endpoint_url().map(|_| ())
    }

    pub fn endpoint_url(&self) -> ConfigResult<Url> {
        let endpoint = self.api_endpoint.trim();
        ensure!(
            !endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "validate-endpoint",
            }
        );

        let url = Url::parse(endpoint).context(InvalidEndpointSnafu {
            stage: "parse-endpoint",
            endpoint: endpoint.to_string(),
        })?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            UnsupportedSchemeSnafu {
                stage: "validate-endpoint-scheme",
                endpoint: endpoint.to_string(),
                scheme: url.scheme().to_string(),
            }
        );

        Ok(url)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn to_transport_config(&self) -> ConfigResult<TransportConfig> {
        Ok(TransportConfig::new(self.endpoint_url()?)
            .with_auth_token(self.auth_token.clone())
            .with_idle_timeout(self.stream_idle_timeout()))
    }
}

/// Override sources read before `init`: a JSON file, then `CHATLET_*` env vars.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    file: Option<PathBuf>,
    env: bool,
}

impl ConfigSources {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(CONFIG_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chatlet"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(CONFIG_FILE_NAME)
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// The default file location plus the environment.
    pub fn standard() -> Self {
        Self::new()
            .with_file(Self::default_config_path())
            .with_env()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    /// Reads the file layer, then the environment layer over it.
    ///
    /// Each source is extracted on its own so a field spelled differently in
    /// the two (`apiEndpoint` in JSON, `api_endpoint` from the environment)
    /// still resolves to one value.
    pub fn load_patch(&self) -> ConfigResult<WidgetConfigPatch> {
        let mut patch = WidgetConfigPatch::default();

        if let Some(path) = &self.file {
            if path.exists() {
                let from_file: WidgetConfigPatch = Figment::from(Json::file(path))
                    .extract()
                    .context(ExtractSnafu {
                        stage: "load-config-file",
                    })?;
                patch = patch.layered(&from_file)?;
            } else {
                tracing::info!("config file not found at {:?}, skipping", path);
            }
        }

        if self.env {
            let from_env: WidgetConfigPatch = Figment::from(Env::prefixed(ENV_PREFIX))
                .extract()
                .context(ExtractSnafu {
                    stage: "load-config-env",
                })?;
            patch = patch.layered(&from_env)?;
        }

        Ok(patch)
    }
}

/// Live configuration of one mounted widget.
pub struct ConfigStore {
    config: ArcSwap<WidgetConfig>,
}

impl ConfigStore {
    pub fn new(config: WidgetConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn config(&self) -> Arc<WidgetConfig> {
        self.config.load_full()
    }

    /// Theme is the only field that changes without a remount.
    pub fn set_theme(&self, theme: Theme) -> Arc<WidgetConfig> {
        self.config.rcu(|current| WidgetConfig {
            theme,
            ..WidgetConfig::clone(current)
        });
        self.config()
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("widget config has no apiEndpoint"))]
    MissingEndpoint { stage: &'static str },
    #[snafu(display("apiEndpoint '{endpoint}' is not a valid URL on `{stage}`: {source}"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
        source: url::ParseError,
    },
    #[snafu(display("apiEndpoint '{endpoint}' uses unsupported scheme '{scheme}'"))]
    UnsupportedScheme {
        stage: &'static str,
        endpoint: String,
        scheme: String,
    },
    #[snafu(display("failed to extract widget config on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        source: figment::Error,
    },
    #[snafu(display("failed to build chat transport on `{stage}`: {source}"))]
    BuildTransport {
        stage: &'static str,
        source: TransportError,
    },
}

fn default_api_endpoint() -> String {
    DEFAULT_API_ENDPOINT.to_string()
}

fn default_welcome_message() -> String {
    DEFAULT_WELCOME_MESSAGE.to_string()
}

fn default_enabled() -> bool {
    true
}

/// Environment values arrive parsed, so `CHATLET_AUTH_TOKEN=12345` is a number.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<serde_json::Value>::deserialize(deserializer)?.and_then(|value| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }),
    )
}
