use block_middleware::{BlockError, BotFilterSettings, PrefetchSettings};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub bots: BotFilterSettings,
    #[serde(default)]
    pub prefetch: PrefetchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            log_level: default_log_level(),
            bots: BotFilterSettings::default(),
            prefetch: PrefetchSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load `config/base.yaml` (if present) overlaid with `APP_` environment
/// variables, e.g. `APP_PREFETCH__NO_CACHE=true` or
/// `APP_PREFETCH__USER_AGENTS=Chrome,Edge`.
pub fn get_configuration() -> Result<Settings, BlockError> {
    let base_path = std::env::current_dir()?;

    // Works from the workspace root or from inside block-server/
    let configuration_directory = if base_path.ends_with("block-server") {
        base_path.join("config")
    } else {
        base_path.join("block-server").join("config")
    };

    load_from(&configuration_directory.join("base.yaml"))
}

pub fn load_from(path: &Path) -> Result<Settings, BlockError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("prefetch.user_agents"),
        )
        .build()?;

    Ok(settings.try_deserialize::<Settings>()?)
}
