/// Widget configuration: defaults, patches, override sources and the live store.
pub mod state;

pub use state::{
    CONFIG_DIRECTORY_NAME, CONFIG_FILE_NAME, ConfigError, ConfigResult, ConfigSources,
    ConfigStore, DEFAULT_API_ENDPOINT, DEFAULT_WELCOME_MESSAGE, ENV_PREFIX, Theme, WidgetConfig,
    WidgetConfigPatch,
};
