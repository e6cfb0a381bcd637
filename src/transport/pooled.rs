//! Pooled dispatcher strategy.
//!
//! Delegates to a `reqwest::Client`, either built from [`PooledConfig`] or injected by the
//! caller. Injected clients are borrowed and never torn down by this transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::header::{CONNECTION, TRANSFER_ENCODING},
};
use reqwest::redirect::Policy;

use super::agent::{AgentHandle, Ownership, Release};
use super::{closed_error, Dispatch, DispatchOutcome, OutboundRequest, RequestBody};
use crate::config::schema::{millis, PooledConfig};
use crate::error::{ErrorKind, ForwardError, SetupError};
use crate::http::url::is_unix;

#[derive(Debug)]
pub struct PooledTransport {
    client: AgentHandle<reqwest::Client>,
    request_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl PooledTransport {
    pub fn new(config: &PooledConfig) -> Result<Self, SetupError> {
        let client = build_client(config)?;
        Ok(Self::from_client(client, Ownership::Owned, config))
    }

    /// Use a caller-supplied client.
    pub fn from_client(client: reqwest::Client, ownership: Ownership, config: &PooledConfig) -> Self {
        let client = match ownership {
            Ownership::Owned => AgentHandle::owned(client),
            Ownership::Borrowed => AgentHandle::borrowed(client, false),
        };
        Self {
            client,
            request_timeout: millis(config.request_timeout_ms),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn begin_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn destroy(&self) {
        if self.client.release() == Release::Destroyed {
            tracing::debug!("Pooled dispatcher destroyed");
        }
    }
}

fn build_client(config: &PooledConfig) -> Result<reqwest::Client, reqwest::Error> {
    if config.pipelining > 1 {
        tracing::warn!(
            pipelining = config.pipelining,
            "HTTP/1.1 pipelining is not supported by the pooled dispatcher; sending one request per connection"
        );
    }

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.connections)
        .pool_idle_timeout(Duration::from_millis(config.keep_alive_timeout_ms))
        .redirect(Policy::none())
        .danger_accept_invalid_certs(!config.reject_unauthorized);
    if let Some(timeout) = millis(config.connect_timeout_ms) {
        builder = builder.connect_timeout(timeout);
    }
    builder = match &config.proxy {
        Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str())?),
        None => builder.no_proxy(),
    };
    builder.build()
}

impl Dispatch for PooledTransport {
    async fn dispatch(&self, request: OutboundRequest) -> Result<DispatchOutcome, ForwardError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        if is_unix(&request.head.url) {
            return Err(ForwardError::UnixSocketUnsupported("pooled"));
        }
        let client = self.client.get().ok_or_else(closed_error)?;

        let OutboundRequest { head, body } = request;
        let mut headers = head.headers;
        headers.remove(CONNECTION);
        headers.remove(TRANSFER_ENCODING);

        let mut builder = client.request(head.method, head.url).headers(headers);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Full(bytes) => builder.body(bytes),
            RequestBody::Stream(body) => {
                builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
            }
        };
        if let Some(timeout) = head.timeout.or(self.request_timeout) {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ForwardError::from_pooled(&e))?;

        Ok(DispatchOutcome {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
            body: Body::from_stream(response.bytes_stream()),
        })
    }

    fn retry_on_error(&self) -> ErrorKind {
        ErrorKind::SocketError
    }
}
