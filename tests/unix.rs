//! Unix socket destinations over the HTTP/1.1 strategy.

use axum::http::StatusCode;

use http_forwarder::config::{ForwardingConfig, Http1Config};
use http_forwarder::{ForwardError, ForwardOptions, Forwarder};

mod common;

#[tokio::test]
async fn forwards_to_unix_socket() {
    let socket = common::start_unix_echo_upstream().await;
    let mut config = ForwardingConfig::with_base(common::unix_base(&socket));
    config.http = Some(Http1Config::default());
    let forwarder = Forwarder::new(config).unwrap();

    let response = forwarder
        .forward(common::get("/hello?x=1"), None, ForwardOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let echo = common::json_body(response).await;
    assert_eq!(echo["path"], "/hello");
    assert_eq!(echo["query"], "x=1");
    assert_eq!(echo["headers"]["host"], "localhost");

    let _ = std::fs::remove_file(socket);
}

#[tokio::test]
async fn pooled_dispatcher_rejects_unix_destinations() {
    let socket = common::start_unix_echo_upstream().await;
    let forwarder = Forwarder::new(ForwardingConfig::default()).unwrap();

    let err = forwarder
        .forward(common::get("/"), Some(&common::unix_base(&socket)), ForwardOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ForwardError::UnixSocketUnsupported("pooled")));

    let _ = std::fs::remove_file(socket);
}

#[tokio::test]
async fn unix_base_needs_http1() {
    let mut config = ForwardingConfig::with_base("unix+http://%2Ftmp%2Fapp.sock/");
    assert!(Forwarder::new(config.clone()).is_err());

    config.http = Some(Http1Config::default());
    assert!(Forwarder::new(config).is_ok());
}
