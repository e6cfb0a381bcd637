//! Retry behaviour against scripted upstreams.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};

use http_forwarder::config::{ForwardingConfig, Http1Config};
use http_forwarder::{ForwardOptions, Forwarder};

mod common;
use common::MockResponse;

fn forwarder(addr: std::net::SocketAddr, retries_count: u32) -> Forwarder {
    let mut config = ForwardingConfig::with_base(format!("http://{addr}"));
    config.http = Some(Http1Config::default());
    config.retries_count = retries_count;
    Forwarder::new(config).unwrap()
}

#[tokio::test]
async fn retries_503_until_success() {
    let (addr, hits) = common::start_programmable_backend(|hit| async move {
        if hit <= 1 {
            MockResponse::new(503, "Service Unavailable")
        } else {
            MockResponse::new(205, "Hello World 2!")
        }
    })
    .await;

    let response = forwarder(addr, 0)
        .forward(common::get("/"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RESET_CONTENT);
    assert_eq!(common::text_body(response).await, "Hello World 2!");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_503_stops_at_ceiling() {
    let (addr, hits) =
        common::start_programmable_backend(|_| async { MockResponse::new(503, "down") }).await;
    let forwarder = forwarder(addr, 0);

    let response = forwarder
        .forward(common::get("/"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(common::text_body(response).await, "down");
    assert_eq!(hits.load(Ordering::SeqCst), 11);

    hits.store(0, Ordering::SeqCst);
    let response = forwarder
        .forward(common::get("/"), None, ForwardOptions::new().max_retries_on_503(2))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_after_is_honoured() {
    let (addr, hits) = common::start_programmable_backend(|hit| async move {
        if hit == 1 {
            MockResponse::new(503, "busy").header("Retry-After", "1")
        } else {
            MockResponse::new(200, "ok")
        }
    })
    .await;

    let started = Instant::now();
    let response = forwarder(addr, 0)
        .forward(common::get("/"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn no_503_retry_for_head_or_explicit_retries() {
    let (addr, hits) =
        common::start_programmable_backend(|_| async { MockResponse::new(503, "down") }).await;

    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let response = forwarder(addr, 0)
        .forward(head, None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    hits.store(0, Ordering::SeqCst);
    let response = forwarder(addr, 2)
        .forward(common::get("/"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reset_is_retried_once() {
    let (addr, hits) = common::start_reset_on_odd_backend("hello world").await;

    let response = forwarder(addr, 1)
        .forward(common::get("/"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::text_body(response).await, "hello world");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reset_without_retries_is_500() {
    let (addr, hits) = common::start_reset_on_odd_backend("hello world").await;

    let response = forwarder(addr, 0)
        .forward(common::get("/"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = common::json_body(response).await;
    assert_eq!(error["code"], "FORWARD_CONNECTION_RESET");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn post_with_body_is_not_retried() {
    let (addr, hits) = common::start_reset_on_odd_backend("hello world").await;
    let post = Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(Body::empty())
        .unwrap();

    let response = forwarder(addr, 3)
        .forward(post, None, ForwardOptions::new().body("payload").content_type("text/plain"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_retry_delay() {
    let (addr, hits) =
        common::start_programmable_backend(|_| async { MockResponse::new(503, "down") }).await;
    let forwarder = forwarder(addr, 0);

    let options = ForwardOptions::new().retry_delay(|ctx| {
        (ctx.attempt < 2).then(|| Duration::from_millis(5))
    });
    let response = forwarder.forward(common::get("/"), None, options).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    hits.store(0, Ordering::SeqCst);
    let options = ForwardOptions::new().retry_delay(|_| Some(Duration::ZERO));
    forwarder.forward(common::get("/"), None, options).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    hits.store(0, Ordering::SeqCst);
    let options = ForwardOptions::new()
        .max_retries_on_503(1)
        .retry_delay(|ctx| ctx.get_default_delay());
    forwarder.forward(common::get("/"), None, options).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
