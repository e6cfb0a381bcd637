//! Transport strategies.
//!
//! # Data Flow
//! ```text
//! Retry coordinator
//!     → Transport::dispatch(OutboundRequest)
//!         - http1.rs  (hyper-util pooled agents per scheme, unix sockets via unix.rs)
//!         - http2.rs  (one multiplexed session per origin)
//!         - pooled.rs (reqwest pooled dispatcher)
//!     → DispatchOutcome { status, headers, body stream } or ForwardError
//! ```
//!
//! # Design Decisions
//! - Exactly one strategy per forwarder, chosen once from configuration
//! - Every strategy advertises the error kind the retry coordinator may retry
//! - `close` marks the strategy closed, yields one scheduler turn, then destroys owned resources

pub mod agent;
pub mod http1;
pub mod http2;
pub mod pooled;
pub mod tls;
pub mod unix;

use std::future::Future;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Response, StatusCode, Version},
};
use futures_util::{future::BoxFuture, FutureExt, StreamExt};
use url::Url;

use crate::config::ForwardingConfig;
use crate::error::{ErrorKind, ForwardError, SetupError};

pub use agent::Ownership;
pub use http1::Http1Transport;
pub use http2::Http2Transport;
pub use pooled::PooledTransport;

/// Body of an outbound request.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Full(Bytes),
    /// Piped from the inbound request; can be sent once.
    Stream(Body),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Empty => true,
            RequestBody::Full(bytes) => bytes.is_empty(),
            RequestBody::Stream(_) => false,
        }
    }

    /// A copy for another attempt. Streams cannot be replayed.
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Full(bytes) => Some(RequestBody::Full(bytes.clone())),
            RequestBody::Stream(_) => None,
        }
    }

    pub fn into_body(self) -> Body {
        match self {
            RequestBody::Empty => Body::empty(),
            RequestBody::Full(bytes) => Body::from(bytes),
            RequestBody::Stream(body) => body,
        }
    }
}

/// Everything about an outbound request except its body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Destination with the resolved query string applied.
    pub url: Url,
    pub headers: HeaderMap,
    /// Per-call override of the strategy's request timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct OutboundRequest {
    pub head: RequestHead,
    pub body: RequestBody,
}

/// A successful upstream exchange. The body is lazy; dropping it releases the connection.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Body,
}

impl DispatchOutcome {
    /// Wrap a hyper response, keeping `guard` alive until the body is dropped.
    pub(crate) fn from_incoming<G>(response: Response<hyper::body::Incoming>, guard: G) -> Self
    where
        G: Send + 'static,
    {
        let (parts, incoming) = response.into_parts();
        let stream = Body::new(incoming).into_data_stream().map(move |chunk| {
            let _held = &guard;
            chunk
        });
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body: Body::from_stream(stream),
        }
    }

    /// Drop the outcome and its body, returning the connection to the transport.
    pub fn discard(self) {
        drop(self.body);
    }
}

/// The uniform request/response contract every strategy implements.
pub trait Dispatch: Send + Sync {
    fn dispatch(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<DispatchOutcome, ForwardError>> + Send;

    /// Error kind the default retry policy treats as retryable.
    fn retry_on_error(&self) -> ErrorKind;
}

/// The active strategy of a forwarder.
#[derive(Debug)]
pub enum Transport {
    Http1(Http1Transport),
    Http2(Http2Transport),
    Pooled(PooledTransport),
}

impl Transport {
    /// Pick and build the strategy: `http2` forces HTTP/2, `http` or a disabled pooled
    /// dispatcher selects HTTP/1.1, otherwise the pooled dispatcher.
    pub fn from_config(config: &ForwardingConfig) -> Result<Self, SetupError> {
        if let Some(http2) = &config.http2 {
            return Ok(Transport::Http2(Http2Transport::new(http2.clone())?));
        }
        if config.http.is_some() || !config.pooled.enabled {
            let http = config.http.clone().unwrap_or_default();
            return Ok(Transport::Http1(Http1Transport::new(
                &http,
                config.global_agent,
                config.destroy_agent,
            )?));
        }
        Ok(Transport::Pooled(PooledTransport::new(&config.pooled)?))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Http1(_) => "http1",
            Transport::Http2(_) => "http2",
            Transport::Pooled(_) => "pooled",
        }
    }

    pub fn supports_unix_sockets(&self) -> bool {
        matches!(self, Transport::Http1(_))
    }

    /// Mark closed, yield one scheduler turn, then destroy owned resources.
    pub async fn close(&self) {
        match self {
            Transport::Http1(t) => t.begin_close(),
            Transport::Http2(t) => t.begin_close(),
            Transport::Pooled(t) => t.begin_close(),
        }
        tokio::task::yield_now().await;
        match self {
            Transport::Http1(t) => t.destroy(),
            Transport::Http2(t) => t.destroy(),
            Transport::Pooled(t) => t.destroy(),
        }
    }

    fn dispatch_boxed(&self, request: OutboundRequest) -> BoxFuture<'_, Result<DispatchOutcome, ForwardError>> {
        match self {
            Transport::Http1(t) => t.dispatch(request).boxed(),
            Transport::Http2(t) => t.dispatch(request).boxed(),
            Transport::Pooled(t) => t.dispatch(request).boxed(),
        }
    }
}

impl Dispatch for Transport {
    fn dispatch(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<DispatchOutcome, ForwardError>> + Send {
        self.dispatch_boxed(request)
    }

    fn retry_on_error(&self) -> ErrorKind {
        match self {
            Transport::Http1(t) => t.retry_on_error(),
            Transport::Http2(t) => t.retry_on_error(),
            Transport::Pooled(t) => t.retry_on_error(),
        }
    }
}

/// Error for dispatches after `close`.
pub(crate) fn closed_error() -> ForwardError {
    ForwardError::ServiceUnavailable {
        reason: "transport is closed".to_string(),
    }
}
