//! Deserializable settings for driving both filters from configuration
//! files or environment variables.

use crate::error::BlockError;
use crate::middleware::prefetch::{
    CookieAgePolicy, DEFAULT_COOKIE_NAME, DEFAULT_COOKIE_PATH, PrefetchGuardLayer,
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct BotFilterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for BotFilterSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrefetchSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    #[serde(default = "default_path")]
    pub path: String,
    /// Empty means every User-Agent.
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default)]
    pub age_policy: CookieAgePolicy,
}

fn default_true() -> bool {
    true
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_max_age_seconds() -> u64 {
    1
}

fn default_path() -> String {
    DEFAULT_COOKIE_PATH.to_string()
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: default_cookie_name(),
            max_age_seconds: default_max_age_seconds(),
            path: default_path(),
            user_agents: Vec::new(),
            no_cache: false,
            age_policy: CookieAgePolicy::default(),
        }
    }
}

impl PrefetchSettings {
    /// Cookie name and path end up inside a script string literal, so both
    /// are restricted to characters that cannot break out of it.
    pub fn validate(&self) -> Result<(), BlockError> {
        if self.cookie_name.is_empty() || !self.cookie_name.bytes().all(is_token_byte) {
            return Err(BlockError::invalid(format!(
                "cookie_name {:?} is not a valid cookie token",
                self.cookie_name
            )));
        }

        if !self.path.starts_with('/') {
            return Err(BlockError::invalid(format!(
                "path {:?} must start with '/'",
                self.path
            )));
        }
        if self
            .path
            .chars()
            .any(|c| c.is_control() || matches!(c, ';' | '\'' | '"' | '<' | '>' | '\\'))
        {
            return Err(BlockError::invalid(format!(
                "path {:?} contains a forbidden character",
                self.path
            )));
        }

        Ok(())
    }
}

// RFC 6265 cookie-name (an RFC 2616 token), minus the single quote that
// would terminate the script literal.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_graphic()
        && !matches!(
            b,
            b'(' | b')'
                | b'<'
                | b'>'
                | b'@'
                | b','
                | b';'
                | b':'
                | b'\\'
                | b'"'
                | b'\''
                | b'/'
                | b'['
                | b']'
                | b'?'
                | b'='
                | b'{'
                | b'}'
        )
}

impl TryFrom<&PrefetchSettings> for PrefetchGuardLayer {
    type Error = BlockError;

    fn try_from(settings: &PrefetchSettings) -> Result<Self, Self::Error> {
        settings.validate()?;

        Ok(PrefetchGuardLayer::new()
            .cookie_name(settings.cookie_name.clone())
            .max_age(Duration::from_secs(settings.max_age_seconds))
            .path(settings.path.clone())
            .user_agent(settings.user_agents.iter().cloned())
            .no_cache(settings.no_cache)
            .age_policy(settings.age_policy))
    }
}
