//! Forwarding orchestrator.
//!
//! # Data Flow
//! ```text
//! Inbound request + source + ForwardOptions
//!     → method, upstream origin, destination URL (cached)
//!     → headers: pseudo-filter, hop-by-hop strip, host, body headers, rewrite_request_headers
//!     → query string, body (body.rs)
//!     → Retrier over the configured transport
//!     → Ok: strip response hop-by-hop headers, rewrite_headers, on_response or stream back
//!     → Err: on_error or the JSON error document
//! ```
//!
//! # Design Decisions
//! - Programmer errors are returned to the caller before any socket is opened
//! - Transport failures always become a response, never an `Err`
//! - Dropping the `forward` future aborts the in-flight upstream exchange

pub mod body;
pub mod options;
pub mod reply;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Version},
    response::Response,
};
use futures_util::TryStreamExt;
use url::Url;

use crate::config::validation::validate_forwarding;
use crate::config::ForwardingConfig;
use crate::error::{ForwardError, SetupError};
use crate::http::request::request_id;
use crate::http::headers::{copy_headers, filter_pseudo_headers, strip_hop_by_hop_headers};
use crate::http::url::{compose, host_header, is_unix, resolve_query};
use crate::http::url_cache::UrlCache;
use crate::load_balancer::{OriginSelector, RoundRobin};
use crate::observability::metrics;
use crate::resilience::{Retrier, RetryPolicy};
use crate::transport::{
    DispatchOutcome, OutboundRequest, Ownership, PooledTransport, RequestHead, Transport,
};

pub use body::{InboundBody, InboundRequest};
pub use options::{ForwardOptions, QueryString, ReplacementBody};
pub use reply::Reply;

/// Handle to a configured forwarding core. Clones share the transport.
#[derive(Clone, Debug)]
pub struct Forwarder {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ForwardingConfig,
    transport: Transport,
    origins: RoundRobin,
    cache: Option<UrlCache>,
    retry_methods: Vec<Method>,
    encode: Vec<String>,
    closed: AtomicBool,
}

/// Builds a [`Forwarder`], optionally around a caller-supplied pooled dispatcher.
pub struct ForwarderBuilder {
    config: ForwardingConfig,
    pooled: Option<(reqwest::Client, Ownership)>,
}

impl ForwarderBuilder {
    pub fn new(config: ForwardingConfig) -> Self {
        Self { config, pooled: None }
    }

    /// Use `client` as the pooled dispatcher. Borrowed clients survive `close`.
    /// Ignored when the configuration selects another strategy.
    pub fn pooled_dispatcher(mut self, client: reqwest::Client, ownership: Ownership) -> Self {
        self.pooled = Some((client, ownership));
        self
    }

    pub fn build(self) -> Result<Forwarder, SetupError> {
        let config = self.config;
        validate_forwarding(&config).map_err(SetupError::Config)?;

        let injected = config.http2.is_none() && config.http.is_none() && config.pooled.enabled;
        let transport = match self.pooled {
            Some((client, ownership)) if injected => {
                Transport::Pooled(PooledTransport::from_client(client, ownership, &config.pooled))
            }
            _ => Transport::from_config(&config)?,
        };

        let retry_methods = config
            .retry_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .collect();

        let mut encode: Vec<String> = config
            .content_types_to_encode
            .iter()
            .map(|ct| body::essence(ct))
            .collect();
        if !encode.iter().any(|ct| ct == "application/json") {
            encode.push("application/json".to_string());
        }

        let cache = (!config.disable_cache).then(|| UrlCache::new(config.cache_urls));

        tracing::info!(
            transport = transport.name(),
            origins = ?config.bases(),
            cache = cache.is_some(),
            "Forwarder configured"
        );

        Ok(Forwarder {
            inner: Arc::new(Inner {
                origins: RoundRobin::new(config.bases()),
                transport,
                cache,
                retry_methods,
                encode,
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }
}

impl Forwarder {
    pub fn new(config: ForwardingConfig) -> Result<Self, SetupError> {
        ForwarderBuilder::new(config).build()
    }

    pub fn builder(config: ForwardingConfig) -> ForwarderBuilder {
        ForwarderBuilder::new(config)
    }

    pub fn config(&self) -> &ForwardingConfig {
        &self.inner.config
    }

    /// Name of the active transport strategy.
    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Pre-listen compatibility check against the content types the host parses.
    /// Returns the ones whose parsed bodies cannot be forwarded.
    pub fn on_ready<S: AsRef<str>>(&self, parsed_content_types: &[S]) -> Vec<String> {
        let incompatible: Vec<String> = parsed_content_types
            .iter()
            .map(|ct| body::essence(ct.as_ref()))
            .filter(|ct| !self.inner.encode.contains(ct))
            .collect();
        for content_type in &incompatible {
            tracing::warn!(
                content_type = %content_type,
                "Host parses a content type that is not re-encoded; such bodies cannot be forwarded"
            );
        }
        incompatible
    }

    /// Teardown: closes the transport, destroying owned agents, sessions and dispatchers.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(transport = self.transport_name(), "Closing forwarder");
        self.inner.transport.close().await;
    }

    /// Forward `request` upstream. `source` defaults to the inbound path and query.
    ///
    /// Transport failures are rendered through `on_error` into the returned response;
    /// `Err` carries programmer errors only.
    pub async fn forward(
        &self,
        request: impl Into<InboundRequest>,
        source: Option<&str>,
        options: ForwardOptions,
    ) -> Result<Response, ForwardError> {
        let start = Instant::now();
        let InboundRequest { parts, body: inbound_body } = request.into();
        let ForwardOptions {
            method,
            query_string,
            content_type,
            body: replacement,
            on_response,
            on_error,
            rewrite_request_headers,
            rewrite_headers,
            get_upstream,
            validate_response,
            retries_count,
            max_retries_on_503,
            retry_delay,
            timeout,
        } = options;

        let method = method.unwrap_or_else(|| parts.method.clone());
        let source = match source {
            Some(source) => source.to_string(),
            None => parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        };

        let base = self.inner.origins.next_origin();
        let origin = match &get_upstream {
            Some(get_upstream) => Some(get_upstream(&parts, base)),
            None => base.map(str::to_string),
        };
        let mut url = self.destination(&source, origin.as_deref())?;
        let transport = &self.inner.transport;
        if is_unix(&url) && !transport.supports_unix_sockets() {
            return Err(ForwardError::UnixSocketUnsupported(transport.name()));
        }

        // A `HeaderMap` never holds pseudo-headers, so this is a plain copy for hyper
        // frontends; the filter matters for raw pairs from other multiplexed frontends.
        let mut headers = if parts.version == Version::HTTP_2 {
            filter_pseudo_headers(parts.headers.iter().map(|(n, v)| (n.as_str(), v.as_bytes())))
        } else {
            parts.headers.clone()
        };
        strip_hop_by_hop_headers(&mut headers);
        let host = HeaderValue::from_str(&host_header(&url))
            .map_err(|_| ForwardError::InvalidSource(source.clone()))?;
        headers.insert(header::HOST, host);

        let query = resolve_query(&url, &parts.uri, &parts, query_string.as_ref());
        url.set_query(query.as_deref());

        let body = body::resolve_body(
            &method,
            inbound_body,
            replacement,
            content_type.as_deref(),
            &self.inner.encode,
            &mut headers,
        )?;

        if let Some(rewrite) = &rewrite_request_headers {
            headers = rewrite(&parts, headers);
        }

        let log = !self.inner.config.disable_request_logging;
        let request_id = request_id(&parts.headers).unwrap_or("unknown").to_string();
        if log {
            tracing::info!(
                request_id = %request_id,
                source = %source,
                method = %method,
                url = %url,
                transport = transport.name(),
                "fetching from remote server"
            );
        }

        let policy = RetryPolicy {
            retry_methods: self.inner.retry_methods.clone(),
            retries_count: retries_count.unwrap_or(self.inner.config.retries_count),
            max_retries_on_503: max_retries_on_503.unwrap_or(self.inner.config.max_retries_on_503),
            custom: retry_delay,
        };
        let outbound = OutboundRequest {
            head: RequestHead {
                method: method.clone(),
                url: url.clone(),
                headers,
                timeout,
            },
            body,
        };

        let mut retrier = Retrier::new(transport, transport.name(), &policy);
        let result = retrier.run(outbound).await;

        let result = match result {
            Ok(outcome) => match &validate_response {
                Some(validate) if !validate(&outcome) => {
                    outcome.discard();
                    Err(ForwardError::BadGateway)
                }
                _ => Ok(outcome),
            },
            Err(err) => Err(err),
        };

        let reply = Reply::new();
        match result {
            Ok(outcome) => {
                let DispatchOutcome {
                    status,
                    version,
                    mut headers,
                    body,
                } = outcome;
                if log {
                    tracing::info!(
                        request_id = %request_id,
                        status = status.as_u16(),
                        attempts = retrier.state().attempt + 1,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "response received"
                    );
                }
                metrics::record_forward(method.as_str(), status.as_u16(), transport.name(), start);

                strip_hop_by_hop_headers(&mut headers);
                let headers = match &rewrite_headers {
                    Some(rewrite) => rewrite(headers, &parts),
                    None => headers,
                };
                let mut reply = reply;
                reply.set_status(status);
                copy_headers(&headers, reply.headers_mut());

                match &on_response {
                    Some(on_response) => Ok(on_response(
                        &parts,
                        reply,
                        DispatchOutcome {
                            status,
                            version,
                            headers,
                            body,
                        },
                    )),
                    None => Ok(reply.send(observed_body(body, url))),
                }
            }
            Err(err) if err.is_programmer_error() => Err(err),
            Err(err) => {
                if log {
                    tracing::warn!(
                        request_id = %request_id,
                        error = %err,
                        code = err.code(),
                        url = %url,
                        "response errored"
                    );
                }
                metrics::record_error(err.code());
                metrics::record_forward(method.as_str(), err.status().as_u16(), transport.name(), start);
                match &on_error {
                    Some(on_error) => Ok(on_error(reply, err)),
                    None => Ok(reply.send_error(&err)),
                }
            }
        }
    }

    fn destination(&self, source: &str, origin: Option<&str>) -> Result<Url, ForwardError> {
        let Some(cache) = &self.inner.cache else {
            return compose(source, origin);
        };
        let key = UrlCache::key(origin, source);
        if let Some(url) = cache.get(&key) {
            return Ok(url);
        }
        let url = compose(source, origin)?;
        cache.insert(key, url.clone());
        Ok(url)
    }
}

/// Response body that logs an upstream failure once the response has started.
fn observed_body(body: Body, url: Url) -> Body {
    Body::from_stream(body.into_data_stream().inspect_err(move |err| {
        tracing::warn!(url = %url, error = %err, "upstream body failed mid-response");
    }))
}
