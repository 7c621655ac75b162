//! Bot filter: diverts requests whose `User-Agent` carries a known bot
//! signature to a separate handler.
//!
//! Matching is a case-sensitive substring test against [`BOT_USER_AGENTS`],
//! so `"Googlebot/2.1"` matches while `"BOT/1.0"` does not. The header is
//! client-supplied and trivially spoofed; this is a traffic-shaping aid, not
//! a security control.

use axum::{
    http::{Request, StatusCode, header::USER_AGENT},
    response::{IntoResponse, Response},
};
use std::{
    convert::Infallible,
    future::{Future, Ready, ready},
    pin::Pin,
    task::{Context, Poll},
};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

/// User-Agent substrings treated as automated clients.
pub const BOT_USER_AGENTS: &[&str] = &["bot", "Bot", "facebookexternalhit"];

/// Returns true if any of the header values contains a bot signature.
///
/// An empty iterator is not a bot.
pub fn is_bot<I, V>(user_agents: I) -> bool
where
    I: IntoIterator<Item = V>,
    V: AsRef<str>,
{
    user_agents.into_iter().any(|value| {
        let value = value.as_ref();
        BOT_USER_AGENTS
            .iter()
            .any(|signature| value.contains(signature))
    })
}

/// Answers bots with `200 OK` and an empty body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBotHandler;

impl<B> Service<Request<B>> for DefaultBotHandler {
    type Response = Response;
    type Error = Infallible;
    type Future = Ready<Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<B>) -> Self::Future {
        ready(Ok(StatusCode::OK.into_response()))
    }
}

/// Layer applying [`BotFilter`].
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(index))
///     .layer(BotFilterLayer::new().bot_handler(service_fn(|_req| async {
///         Ok::<_, Infallible>(StatusCode::FORBIDDEN.into_response())
///     })));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BotFilterLayer<H = DefaultBotHandler> {
    bot_handler: H,
}

impl BotFilterLayer {
    pub fn new() -> Self {
        Self {
            bot_handler: DefaultBotHandler,
        }
    }
}

impl<H> BotFilterLayer<H> {
    /// Replace the handler bots are sent to. The handler must be infallible,
    /// as axum handlers and routers are.
    pub fn bot_handler<T>(self, bot_handler: T) -> BotFilterLayer<T> {
        BotFilterLayer { bot_handler }
    }
}

impl<S, H: Clone> Layer<S> for BotFilterLayer<H> {
    type Service = BotFilter<S, H>;

    fn layer(&self, inner: S) -> Self::Service {
        BotFilter {
            inner,
            bot_handler: self.bot_handler.clone(),
        }
    }
}

/// Service wrapper routing bot traffic away from `inner`.
#[derive(Debug, Clone)]
pub struct BotFilter<S, H = DefaultBotHandler> {
    inner: S,
    bot_handler: H,
}

impl<S> BotFilter<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            bot_handler: DefaultBotHandler,
        }
    }
}

impl<S, H> BotFilter<S, H> {
    pub fn with_bot_handler(inner: S, bot_handler: H) -> Self {
        Self { inner, bot_handler }
    }
}

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

impl<S, H, B> Service<Request<B>> for BotFilter<S, H>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    H: Service<Request<B>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    H::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Header values are not guaranteed UTF-8; decode lossily so
        // classification is total.
        let bot = is_bot(
            req.headers()
                .get_all(USER_AGENT)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes())),
        );

        if bot {
            debug!(
                method = %req.method(),
                path = %req.uri().path(),
                "Diverting bot request"
            );
            let bot_handler = self.bot_handler.clone();
            return Box::pin(async move {
                match bot_handler.oneshot(req).await {
                    Ok(response) => Ok(response),
                    Err(never) => match never {},
                }
            });
        }

        // Call the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
