//! Prefetch guard.
//!
//! Browsers speculatively fetch (prefetch/prerender) pages they expect the
//! user to open. For an in-scope request without an acceptable cookie the
//! guard answers with a tiny confirmation page instead of the real content.
//! The page's script only runs its body while the document is visible: it
//! stores the current server timestamp in a cookie and reloads. Background
//! loads never set the cookie and never reach the wrapped service.
//!
//! All state lives in the client's cookie; nothing is kept between requests.

use axum::{
    http::{
        HeaderMap, HeaderValue, Request,
        header::{CACHE_CONTROL, COOKIE, USER_AGENT},
    },
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use serde::Deserialize;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tower::{Layer, Service};
use tracing::debug;

pub const DEFAULT_COOKIE_NAME: &str = "block-prefetch";
pub const DEFAULT_COOKIE_PATH: &str = "/";

/// Smallest max-age accepted. Shorter values would be written to the cookie
/// as `max-age=0`, which deletes it on arrival.
pub const MIN_MAX_AGE: Duration = Duration::from_secs(1);

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// How the cookie's age is compared with the configured max-age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieAgePolicy {
    /// Valid once `max_age < elapsed`. A cookie set moments ago is rejected
    /// and the confirmation page is served again until it has aged past
    /// max-age. This is the comparison the guard has always shipped with.
    #[default]
    OlderThanMaxAge,
    /// Valid while `0 <= elapsed <= max_age`; re-challenge once stale.
    /// Timestamps in the future are rejected.
    YoungerThanMaxAge,
}

impl CookieAgePolicy {
    /// `elapsed_ns` may be negative when the cookie carries a future
    /// timestamp.
    pub fn accepts(self, elapsed_ns: i128, max_age: Duration) -> bool {
        let max_age_ns = i128::try_from(max_age.as_nanos()).unwrap_or(i128::MAX);
        match self {
            CookieAgePolicy::OlderThanMaxAge => max_age_ns < elapsed_ns,
            CookieAgePolicy::YoungerThanMaxAge => (0..=max_age_ns).contains(&elapsed_ns),
        }
    }
}

/// Immutable guard configuration, shared by every clone of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchConfig {
    max_age: Duration,
    cookie_name: String,
    user_agents: Vec<String>,
    path: String,
    no_cache: bool,
    age_policy: CookieAgePolicy,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_age: MIN_MAX_AGE,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            user_agents: Vec::new(),
            path: DEFAULT_COOKIE_PATH.to_string(),
            no_cache: false,
            age_policy: CookieAgePolicy::default(),
        }
    }
}

impl PrefetchConfig {
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn user_agents(&self) -> &[String] {
        &self.user_agents
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    pub fn age_policy(&self) -> CookieAgePolicy {
        self.age_policy
    }

    /// An empty scope list covers every request, including ones without a
    /// User-Agent. Otherwise the User-Agent must contain one of the entries.
    pub fn applies_to(&self, user_agent: &str) -> bool {
        self.user_agents.is_empty()
            || self
                .user_agents
                .iter()
                .any(|ua| user_agent.contains(ua.as_str()))
    }

    /// A missing or non-integer value is invalid; otherwise the age policy
    /// decides on `now_ns - value`.
    pub fn cookie_is_valid(&self, value: Option<&str>, now_ns: i64) -> bool {
        let Some(value) = value else {
            return false;
        };
        let Ok(set_at_ns) = value.parse::<i64>() else {
            return false;
        };
        let elapsed_ns = i128::from(now_ns) - i128::from(set_at_ns);
        self.age_policy.accepts(elapsed_ns, self.max_age)
    }

    fn confirmation_response(&self, now_ns: i64) -> Response {
        let page = render_confirmation_page(
            &self.cookie_name,
            now_ns,
            self.max_age.as_secs(),
            &self.path,
        );
        let mut response = Html(page).into_response();
        if self.no_cache {
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
        }
        response
    }
}

/// Render the confirmation page. `max_age_secs` is whole seconds.
pub fn render_confirmation_page(
    cookie_name: &str,
    timestamp_ns: i64,
    max_age_secs: u64,
    path: &str,
) -> String {
    format!(
        "<!DOCTYPE html>
<html>
<head>
</head>
<body>
<script>
\tif (document.visibilityState === 'visible') {{
\t\tdocument.cookie = '{cookie_name}={timestamp_ns}' + '; max-age={max_age_secs}; path={path}';
\t\twindow.location.reload();
\t}}
</script>
</body>
</html>"
    )
}

/// First cookie called `name` across all `Cookie` headers. A single pair of
/// surrounding double quotes is removed.
///
/// Browsers send non-ASCII cookie values as raw bytes; headers are decoded
/// lossily so one such cookie does not hide its neighbours.
fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| unquote(cookie.value()).to_string())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Layer applying [`PrefetchGuard`].
///
/// Built once at startup; every builder call returns the updated layer.
/// Scalar options override earlier calls, [`user_agent`](Self::user_agent)
/// appends.
#[derive(Debug, Clone, Default)]
pub struct PrefetchGuardLayer {
    config: Arc<PrefetchConfig>,
}

impl PrefetchGuardLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Clamped to [`MIN_MAX_AGE`].
    pub fn max_age(mut self, max_age: Duration) -> Self {
        Arc::make_mut(&mut self.config).max_age = max_age.max(MIN_MAX_AGE);
        self
    }

    pub fn cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).cookie_name = cookie_name.into();
        self
    }

    /// Restrict the guard to User-Agents containing any of these substrings.
    pub fn user_agent<I, U>(mut self, user_agents: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        Arc::make_mut(&mut self.config)
            .user_agents
            .extend(user_agents.into_iter().map(Into::into));
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).path = path.into();
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        Arc::make_mut(&mut self.config).no_cache = no_cache;
        self
    }

    pub fn age_policy(mut self, age_policy: CookieAgePolicy) -> Self {
        Arc::make_mut(&mut self.config).age_policy = age_policy;
        self
    }
}

impl<S> Layer<S> for PrefetchGuardLayer {
    type Service = PrefetchGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PrefetchGuard {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service wrapper serving the confirmation page until the cookie passes.
#[derive(Debug, Clone)]
pub struct PrefetchGuard<S> {
    inner: S,
    config: Arc<PrefetchConfig>,
}

impl<S> PrefetchGuard<S> {
    pub fn new(inner: S) -> Self {
        PrefetchGuardLayer::new().layer(inner)
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }
}

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

impl<S, B> Service<Request<B>> for PrefetchGuard<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let in_scope = {
            let user_agent = req
                .headers()
                .get(USER_AGENT)
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .unwrap_or_default();
            self.config.applies_to(&user_agent)
        };
        if !in_scope {
            return Box::pin(async move { inner.call(req).await });
        }

        let now_ns = now_nanos();
        let cookie = find_cookie(req.headers(), self.config.cookie_name());
        if self.config.cookie_is_valid(cookie.as_deref(), now_ns) {
            return Box::pin(async move { inner.call(req).await });
        }

        debug!(
            path = %req.uri().path(),
            cookie_present = cookie.is_some(),
            "Serving prefetch confirmation page"
        );
        let response = self.config.confirmation_response(now_ns);
        Box::pin(async move { Ok(response) })
    }
}
