//! HTTP/2 strategy against a prior-knowledge HTTP/2 upstream.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;

use http_forwarder::config::{ForwardingConfig, Http2Config};
use http_forwarder::{ForwardOptions, Forwarder};

mod common;

fn http2_forwarder(addr: std::net::SocketAddr, config: Http2Config) -> Forwarder {
    let mut forwarding = ForwardingConfig::with_base(format!("http://{addr}"));
    forwarding.http2 = Some(config);
    Forwarder::new(forwarding).unwrap()
}

#[tokio::test]
async fn forwards_over_one_session() {
    let upstream = common::start_echo_upstream().await;
    let forwarder = http2_forwarder(upstream, Http2Config::default());
    assert_eq!(forwarder.transport_name(), "http2");

    for path in ["/first", "/second"] {
        let response = forwarder.forward(common::get(path), None, ForwardOptions::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let echo = common::json_body(response).await;
        assert_eq!(echo["version"], "HTTP/2.0");
        assert_eq!(echo["path"], path);
        assert!(echo["headers"].get("connection").is_none());
    }
    forwarder.close().await;
}

#[tokio::test]
async fn concurrent_streams_share_the_session() {
    let upstream = common::start_echo_upstream().await;
    let forwarder = http2_forwarder(upstream, Http2Config::default());

    let calls = (0..8).map(|i| {
        let forwarder = forwarder.clone();
        async move {
            let path = format!("/stream/{i}");
            let response = forwarder
                .forward(common::get(&path), None, ForwardOptions::new())
                .await
                .unwrap();
            common::json_body(response).await["path"] == path.as_str()
        }
    });
    let results = futures_util::future::join_all(calls).await;
    assert!(results.into_iter().all(|ok| ok));
}

#[tokio::test]
async fn disabled_request_timeout_waits_for_slow_upstream() {
    let upstream = common::start_echo_upstream().await;
    let forwarder = http2_forwarder(
        upstream,
        Http2Config {
            request_timeout_ms: 0,
            session_timeout_ms: 10_000,
            ..Http2Config::default()
        },
    );

    let response = forwarder
        .forward(common::get("/slow/300"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::text_body(response).await, "slow");
}

#[tokio::test]
async fn request_timeout_cancels_only_its_stream() {
    let upstream = common::start_echo_upstream().await;
    let forwarder = http2_forwarder(
        upstream,
        Http2Config {
            request_timeout_ms: 100,
            ..Http2Config::default()
        },
    );

    let response = forwarder
        .forward(common::get("/slow/1000"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let error = common::json_body(response).await;
    assert_eq!(error["code"], "FORWARD_GATEWAY_TIMEOUT");

    let response = forwarder
        .forward(common::get("/after"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn session_timeout_is_enforced_and_session_recreated() {
    let upstream = common::start_echo_upstream().await;
    let forwarder = http2_forwarder(
        upstream,
        Http2Config {
            request_timeout_ms: 0,
            session_timeout_ms: 100,
            ..Http2Config::default()
        },
    );

    let response = forwarder
        .forward(common::get("/slow/1000"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let error = common::json_body(response).await;
    assert_eq!(error["code"], "FORWARD_GATEWAY_TIMEOUT");
    assert_eq!(error["message"], "HTTP/2 session timed out");

    let response = forwarder
        .forward(common::get("/again"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let echo = common::json_body(response).await;
    assert_eq!(echo["path"], "/again");
}

#[tokio::test]
async fn unreachable_origin_is_service_unavailable() {
    let forwarder = http2_forwarder("127.0.0.1:1".parse().unwrap(), Http2Config::default());
    let response = forwarder.forward(common::get("/"), None, ForwardOptions::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn session_is_recreated_after_goaway() {
    let (upstream, accepted, closed) = common::start_goaway_h2_upstream().await;
    let forwarder = http2_forwarder(upstream, Http2Config::default());

    let response = forwarder.forward(common::get("/first"), None, ForwardOptions::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::text_body(response).await, "/first");

    common::wait_for(&closed, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = forwarder.forward(common::get("/second"), None, ForwardOptions::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::text_body(response).await, "/second");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stalled_handshake_is_bounded_by_request_timeout() {
    let (addr, _) = common::start_silent_listener().await;
    let mut forwarding = ForwardingConfig::with_base(format!("https://{addr}"));
    forwarding.http2 = Some(Http2Config {
        request_timeout_ms: 200,
        ..Http2Config::default()
    });
    let forwarder = Forwarder::new(forwarding).unwrap();

    for _ in 0..2 {
        let response = tokio::time::timeout(
            Duration::from_secs(3),
            forwarder.forward(common::get("/"), None, ForwardOptions::new()),
        )
        .await
        .expect("dispatch finished")
        .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}

#[tokio::test]
async fn stalled_handshake_times_out_and_reconnects() {
    let (addr, accepts) = common::start_silent_listener().await;
    let mut forwarding = ForwardingConfig::with_base(format!("https://{addr}"));
    forwarding.http2 = Some(Http2Config {
        request_timeout_ms: 0,
        connect_timeout_ms: 200,
        ..Http2Config::default()
    });
    let forwarder = Forwarder::new(forwarding).unwrap();

    for attempt in 1..=2 {
        let response = tokio::time::timeout(
            Duration::from_secs(3),
            forwarder.forward(common::get("/"), None, ForwardOptions::new()),
        )
        .await
        .expect("dispatch finished")
        .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(accepts.load(Ordering::SeqCst), attempt);
    }
}
