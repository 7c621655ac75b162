use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, StatusCode, header},
    response::Response,
    routing::get,
};
use block_middleware::{CookieAgePolicy, PrefetchGuard, PrefetchGuardLayer};
use chrono::Utc;
use http_body_util::BodyExt;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tower::{service_fn, util::ServiceExt};

const SECOND_NS: i64 = 1_000_000_000;

fn counting_router(calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/",
        get(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                "downstream"
            }
        }),
    )
}

fn request(user_agent: Option<&str>, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/");
    if let Some(ua) = user_agent {
        builder = builder.header(header::USER_AGENT, ua);
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn is_confirmation_page(body: &str) -> bool {
    body.contains("document.visibilityState === 'visible'") && body.contains("document.cookie")
}

#[tokio::test]
async fn test_missing_cookie_serves_confirmation_page() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(PrefetchGuardLayer::new());

    let response = app
        .oneshot(request(Some("Mozilla/5.0 Chrome/100"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );
    assert!(response.headers().get(header::CACHE_CONTROL).is_none());
    let body = body_string(response).await;
    assert!(is_confirmation_page(&body));
    assert!(body.contains("'block-prefetch="));
    assert!(body.contains("; max-age=1; path=/'"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unscoped_guard_covers_requests_without_user_agent() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(PrefetchGuardLayer::new());

    let response = app.clone().oneshot(request(None, None)).await.unwrap();
    assert!(is_confirmation_page(&body_string(response).await));

    let response = app.oneshot(request(Some(""), None)).await.unwrap();
    assert!(is_confirmation_page(&body_string(response).await));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unparsable_cookie_is_treated_as_missing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(PrefetchGuardLayer::new());

    let response = app
        .oneshot(request(Some("Mozilla/5.0"), Some("block-prefetch=abc")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(is_confirmation_page(&body_string(response).await));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// Default policy: `max_age < elapsed`. A cookie the page set a moment ago
// is challenged again; only a cookie older than max-age passes.
#[tokio::test]
async fn test_default_policy_challenges_fresh_cookie() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(PrefetchGuardLayer::new());

    let fresh = format!("block-prefetch={}", now_ns());
    let response = app
        .oneshot(request(Some("Mozilla/5.0"), Some(&fresh)))
        .await
        .unwrap();

    assert!(is_confirmation_page(&body_string(response).await));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_default_policy_passes_cookie_older_than_max_age() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(PrefetchGuardLayer::new());

    let aged = format!("block-prefetch={}", now_ns() - 2 * SECOND_NS);
    let response = app
        .oneshot(request(Some("Mozilla/5.0"), Some(&aged)))
        .await
        .unwrap();

    assert_eq!(body_string(response).await, "downstream");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_younger_than_max_age_policy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(
        PrefetchGuardLayer::new()
            .max_age(Duration::from_secs(10))
            .age_policy(CookieAgePolicy::YoungerThanMaxAge),
    );

    let fresh = format!("block-prefetch={}", now_ns() - SECOND_NS);
    let response = app
        .clone()
        .oneshot(request(Some("Mozilla/5.0"), Some(&fresh)))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "downstream");

    let stale = format!("block-prefetch={}", now_ns() - 60 * SECOND_NS);
    let response = app
        .oneshot(request(Some("Mozilla/5.0"), Some(&stale)))
        .await
        .unwrap();
    assert!(is_confirmation_page(&body_string(response).await));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scoped_guard_bypasses_other_user_agents() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app =
        counting_router(calls.clone()).layer(PrefetchGuardLayer::new().user_agent(["Chrome"]));

    let response = app
        .clone()
        .oneshot(request(Some("Safari/1.0"), None))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "downstream");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let response = app
        .clone()
        .oneshot(request(None, None))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "downstream");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let response = app
        .oneshot(request(Some("Mozilla/5.0 Chrome/100"), None))
        .await
        .unwrap();
    assert!(is_confirmation_page(&body_string(response).await));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_custom_cookie_settings_and_no_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_router(calls.clone()).layer(
        PrefetchGuardLayer::new()
            .cookie_name("pf")
            .max_age(Duration::from_millis(5_900))
            .path("/app")
            .no_cache(true),
    );

    let response = app
        .clone()
        .oneshot(request(Some("Mozilla/5.0"), Some("block-prefetch=1")))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache, no-store, must-revalidate"
    );
    let body = body_string(response).await;
    assert!(body.contains("document.cookie = 'pf="));
    assert!(body.contains("; max-age=5; path=/app'"));

    let aged = format!("session=x; pf={}", now_ns() - 10 * SECOND_NS);
    let response = app
        .oneshot(request(Some("Mozilla/5.0"), Some(&aged)))
        .await
        .unwrap();
    assert_eq!(body_string(response).await, "downstream");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_prefetch_guard_wraps_plain_service() {
    let inner = service_fn(|_req: Request<Body>| async {
        Ok::<_, std::convert::Infallible>(axum::response::IntoResponse::into_response("inner"))
    });
    let guard = PrefetchGuard::new(inner);

    let response = guard.clone().oneshot(request(None, None)).await.unwrap();
    assert!(is_confirmation_page(&body_string(response).await));

    let aged = format!("block-prefetch={}", now_ns() - 5 * SECOND_NS);
    let response = guard.oneshot(request(None, Some(&aged))).await.unwrap();
    assert_eq!(body_string(response).await, "inner");
}

#[tokio::test]
async fn test_independent_instances_behave_identically() {
    let build = || {
        counting_router(Arc::new(AtomicUsize::new(0)))
            .layer(PrefetchGuardLayer::new().user_agent(["Chrome"]))
    };
    let first = build();
    let second = build();

    let aged = format!("block-prefetch={}", now_ns() - 5 * SECOND_NS);
    let cases = [
        (Some("Chrome/100"), None),
        (Some("Chrome/100"), Some(aged.as_str())),
        (Some("Safari/1.0"), None),
        (None, Some("block-prefetch=abc")),
    ];

    for (ua, cookie) in cases {
        let a = first.clone().oneshot(request(ua, cookie)).await.unwrap();
        let b = second.clone().oneshot(request(ua, cookie)).await.unwrap();
        assert_eq!(a.status(), b.status());
        assert_eq!(
            is_confirmation_page(&body_string(a).await),
            is_confirmation_page(&body_string(b).await)
        );
    }
}

#[tokio::test]
async fn test_non_ascii_sibling_cookie_does_not_hide_guard_cookie() {
    let inner = service_fn(|_req: Request<Body>| async {
        Ok::<_, std::convert::Infallible>(axum::response::IntoResponse::into_response("inner"))
    });
    let guard = PrefetchGuard::new(inner);

    let cookie = format!("block-prefetch={}; name=café", now_ns() - 5 * SECOND_NS);
    let mut req = request(Some("Mozilla/5.0"), None);
    req.headers_mut().insert(
        header::COOKIE,
        HeaderValue::from_bytes(cookie.as_bytes()).unwrap(),
    );

    let response = guard.oneshot(req).await.unwrap();
    assert_eq!(body_string(response).await, "inner");
}

#[tokio::test]
async fn test_scoped_guard_matches_non_utf8_user_agent() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app =
        counting_router(calls.clone()).layer(PrefetchGuardLayer::new().user_agent(["Chrome"]));

    let mut req = request(None, None);
    req.headers_mut().insert(
        header::USER_AGENT,
        HeaderValue::from_bytes(b"Chrome/100 \xff").unwrap(),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert!(is_confirmation_page(&body_string(response).await));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let mut req = request(None, None);
    req.headers_mut().insert(
        header::USER_AGENT,
        HeaderValue::from_bytes(b"Safari/1.0 \xff").unwrap(),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(body_string(response).await, "downstream");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
