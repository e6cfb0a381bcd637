//! HTTP/1.1 over unix domain sockets.
//!
//! Destinations look like `unix+http://%2Fvar%2Frun%2Fapp.sock/path`: the host is the
//! percent-encoded socket path. Each request opens its own connection.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Uri},
};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_rustls::TlsConnector;

use super::{DispatchOutcome, OutboundRequest};
use crate::error::ForwardError;
use crate::http::url::{path_and_query, unix_socket_path};

/// Server name presented for `unix+https` destinations.
const UNIX_TLS_SERVER_NAME: &str = "localhost";

pub async fn dispatch(
    request: OutboundRequest,
    tls: Arc<rustls::ClientConfig>,
    timeout: Option<Duration>,
) -> Result<DispatchOutcome, ForwardError> {
    let exchange = send(request, tls);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| ForwardError::RequestTimeout)?,
        None => exchange.await,
    }
}

async fn send(
    request: OutboundRequest,
    tls: Arc<rustls::ClientConfig>,
) -> Result<DispatchOutcome, ForwardError> {
    let url = &request.head.url;
    let path = unix_socket_path(url)
        .ok_or_else(|| ForwardError::InvalidSource(url.to_string()))?;
    let target: Uri = path_and_query(url)
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| ForwardError::Internal(e.to_string()))?;
    let secure = url.scheme() == "unix+https";

    tracing::trace!(socket = %path.display(), "Connecting to unix socket");
    let stream = UnixStream::connect(&path)
        .await
        .map_err(|e| ForwardError::from_connect(&e))?;

    let mut outbound = Request::new(request.body.into_body());
    *outbound.method_mut() = request.head.method;
    *outbound.uri_mut() = target;
    *outbound.headers_mut() = request.head.headers;

    if secure {
        let name = ServerName::try_from(UNIX_TLS_SERVER_NAME.to_string())
            .map_err(|e| ForwardError::Internal(e.to_string()))?;
        let stream = TlsConnector::from(tls)
            .connect(name, stream)
            .await
            .map_err(|e| ForwardError::from_connect(&e))?;
        exchange(stream, outbound).await
    } else {
        exchange(stream, outbound).await
    }
}

async fn exchange<S>(stream: S, request: Request<Body>) -> Result<DispatchOutcome, ForwardError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .map_err(|e| ForwardError::from_hyper_chain(&e))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!(error = %err, "Unix socket connection closed with error");
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| ForwardError::from_hyper_chain(&e))?;
    Ok(DispatchOutcome::from_incoming(response, ()))
}
