//! block-middleware: request filters for axum/tower services.
//!
//! - [`BotFilterLayer`] diverts requests whose `User-Agent` matches a known
//!   bot signature to a separate handler.
//! - [`PrefetchGuardLayer`] answers speculative page loads with a small
//!   script that sets a timestamped cookie and reloads, so only visible
//!   navigations reach the wrapped service.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use config::{BotFilterSettings, PrefetchSettings};
pub use error::BlockError;
pub use middleware::bots::{BOT_USER_AGENTS, BotFilter, BotFilterLayer, DefaultBotHandler, is_bot};
pub use middleware::prefetch::{
    CookieAgePolicy, PrefetchConfig, PrefetchGuard, PrefetchGuardLayer, render_confirmation_page,
};

pub use axum;
pub use tower;
pub use tracing;
