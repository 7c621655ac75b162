use axum::{routing::get, Router};
use block_middleware::{BlockError, BotFilterLayer, PrefetchGuardLayer};
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::handlers::app::{health_check, index};

/// Page routes sit behind the prefetch guard and, outermost, the bot
/// filter. `/health` is mounted after both so probes bypass them.
pub fn build_router(settings: &Settings) -> Result<Router, BlockError> {
    let mut app = Router::new().route("/", get(index));

    if settings.prefetch.enabled {
        app = app.layer(PrefetchGuardLayer::try_from(&settings.prefetch)?);
    }
    if settings.bots.enabled {
        app = app.layer(BotFilterLayer::new());
    }

    Ok(app.route("/health", get(health_check)).layer(
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        }),
    ))
}
