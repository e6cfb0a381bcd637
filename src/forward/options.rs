//! Per-call forwarding options.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{request::Parts, HeaderMap, Method, Uri},
    response::Response,
};
use serde_json::Value;

use crate::error::ForwardError;
use crate::forward::reply::Reply;
use crate::resilience::{RetryContext, RetryDelayFn};
use crate::transport::DispatchOutcome;

pub type QueryStringFn = Arc<dyn Fn(&str, &Uri, &Parts) -> String + Send + Sync>;
pub type OnResponseFn = Arc<dyn Fn(&Parts, Reply, DispatchOutcome) -> Response + Send + Sync>;
pub type OnErrorFn = Arc<dyn Fn(Reply, ForwardError) -> Response + Send + Sync>;
pub type RewriteRequestHeadersFn = Arc<dyn Fn(&Parts, HeaderMap) -> HeaderMap + Send + Sync>;
pub type RewriteHeadersFn = Arc<dyn Fn(HeaderMap, &Parts) -> HeaderMap + Send + Sync>;
pub type GetUpstreamFn = Arc<dyn Fn(&Parts, Option<&str>) -> String + Send + Sync>;
pub type ValidateResponseFn = Arc<dyn Fn(&DispatchOutcome) -> bool + Send + Sync>;

/// Outbound query string override.
#[derive(Clone)]
pub enum QueryString {
    /// Pairs merged over the destination's own query.
    Static(Vec<(String, String)>),
    /// `(destination search, inbound URI, inbound request) -> query`.
    Dynamic(QueryStringFn),
}

impl QueryString {
    pub fn pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        QueryString::Static(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&str, &Uri, &Parts) -> String + Send + Sync + 'static,
    {
        QueryString::Dynamic(Arc::new(f))
    }
}

/// Replacement for the inbound body.
#[derive(Debug, Default)]
pub enum ReplacementBody {
    /// Forward the inbound body.
    #[default]
    Inbound,
    /// Send no body at all.
    Null,
    Json(Value),
    Text(String),
    Bytes(Bytes),
    /// Rejected: replacement bodies cannot be streams.
    Stream(Body),
}

impl From<Value> for ReplacementBody {
    fn from(value: Value) -> Self {
        ReplacementBody::Json(value)
    }
}

impl From<String> for ReplacementBody {
    fn from(text: String) -> Self {
        ReplacementBody::Text(text)
    }
}

impl From<&str> for ReplacementBody {
    fn from(text: &str) -> Self {
        ReplacementBody::Text(text.to_string())
    }
}

impl From<Bytes> for ReplacementBody {
    fn from(bytes: Bytes) -> Self {
        ReplacementBody::Bytes(bytes)
    }
}

/// Options of one `forward` call. Unset fields fall back to the forwarder's configuration.
#[derive(Default)]
pub struct ForwardOptions {
    pub(crate) method: Option<Method>,
    pub(crate) query_string: Option<QueryString>,
    pub(crate) content_type: Option<String>,
    pub(crate) body: ReplacementBody,
    pub(crate) on_response: Option<OnResponseFn>,
    pub(crate) on_error: Option<OnErrorFn>,
    pub(crate) rewrite_request_headers: Option<RewriteRequestHeadersFn>,
    pub(crate) rewrite_headers: Option<RewriteHeadersFn>,
    pub(crate) get_upstream: Option<GetUpstreamFn>,
    pub(crate) validate_response: Option<ValidateResponseFn>,
    pub(crate) retries_count: Option<u32>,
    pub(crate) max_retries_on_503: Option<u32>,
    pub(crate) retry_delay: Option<RetryDelayFn>,
    pub(crate) timeout: Option<Duration>,
}

impl ForwardOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the inbound method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn query_string(mut self, query: QueryString) -> Self {
        self.query_string = Some(query);
        self
    }

    /// Declared content type of the replacement body; the body is then sent verbatim.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn body(mut self, body: impl Into<ReplacementBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn null_body(mut self) -> Self {
        self.body = ReplacementBody::Null;
        self
    }

    /// Take over the response. The reply already carries the upstream status and headers.
    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, Reply, DispatchOutcome) -> Response + Send + Sync + 'static,
    {
        self.on_response = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(Reply, ForwardError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// The returned map is exactly the header set sent upstream.
    pub fn rewrite_request_headers<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, HeaderMap) -> HeaderMap + Send + Sync + 'static,
    {
        self.rewrite_request_headers = Some(Arc::new(f));
        self
    }

    /// Rewrite the response headers before they reach the client.
    pub fn rewrite_headers<F>(mut self, f: F) -> Self
    where
        F: Fn(HeaderMap, &Parts) -> HeaderMap + Send + Sync + 'static,
    {
        self.rewrite_headers = Some(Arc::new(f));
        self
    }

    /// Pick the upstream origin from the inbound request and the configured base.
    pub fn get_upstream<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, Option<&str>) -> String + Send + Sync + 'static,
    {
        self.get_upstream = Some(Arc::new(f));
        self
    }

    /// Reject an upstream response; rejected calls fail with `502 Bad Gateway`.
    pub fn validate_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&DispatchOutcome) -> bool + Send + Sync + 'static,
    {
        self.validate_response = Some(Arc::new(f));
        self
    }

    pub fn retries_count(mut self, retries: u32) -> Self {
        self.retries_count = Some(retries);
        self
    }

    pub fn max_retries_on_503(mut self, retries: u32) -> Self {
        self.max_retries_on_503 = Some(retries);
        self
    }

    /// Replace the retry policy. Returning `None` or a zero delay stops retrying.
    pub fn retry_delay<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryContext<'_>) -> Option<Duration> + Send + Sync + 'static,
    {
        self.retry_delay = Some(Arc::new(f));
        self
    }

    /// Per-call request timeout, overriding the transport's.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
