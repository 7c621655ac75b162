use thiserror::Error;

/// Setup-time failures. Request handling itself never fails: every fallible
/// step there degrades to a defined default.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlockError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        BlockError::InvalidSetting(msg.into())
    }
}
