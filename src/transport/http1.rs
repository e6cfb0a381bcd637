//! HTTP/1.1 strategy over keep-alive agents.
//!
//! # Responsibilities
//! - One pooling agent per scheme, shared by every dispatch
//! - Cap concurrent requests at `max_sockets`
//! - Abort requests that exceed the request timeout
//! - Route `unix+http(s)` destinations to [`super::unix`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Uri},
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::agent::{AgentHandle, Release};
use super::{closed_error, tls, unix, Dispatch, DispatchOutcome, OutboundRequest};
use crate::config::schema::{millis, Http1Config};
use crate::error::{ErrorKind, ForwardError, SetupError};
use crate::http::url::is_unix;

/// The per-scheme agents of one configuration.
#[derive(Debug)]
pub struct Http1Agents {
    http: Client<HttpConnector, Body>,
    https: Client<HttpsConnector<HttpConnector>, Body>,
    unix_tls: Arc<rustls::ClientConfig>,
    limiter: Option<Arc<Semaphore>>,
}

impl Http1Agents {
    pub fn new(config: &Http1Config) -> Result<Self, SetupError> {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_nodelay(true);
        connector.set_connect_timeout(millis(config.connect_timeout_ms));
        if config.keep_alive {
            connector.set_keepalive(Some(Duration::from_millis(config.keep_alive_msecs)));
        }

        let tls_config = tls::client_config(config.reject_unauthorized, &[])?;
        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config.clone())
            .https_or_http()
            .enable_http1()
            .wrap_connector(connector.clone());

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_millis(config.keep_alive_msecs))
            .pool_max_idle_per_host(if config.keep_alive {
                config.max_free_sockets
            } else {
                0
            });

        Ok(Self {
            http: builder.build(connector),
            https: builder.build(https_connector),
            unix_tls: Arc::new(tls_config),
            limiter: (config.max_sockets > 0).then(|| Arc::new(Semaphore::new(config.max_sockets))),
        })
    }
}

static GLOBAL_AGENTS: Mutex<Option<Arc<Http1Agents>>> = Mutex::new(None);

/// The process-wide agents, created with `config` on first use.
pub fn global_agents(config: &Http1Config) -> Result<Arc<Http1Agents>, SetupError> {
    let mut slot = GLOBAL_AGENTS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(agents) = slot.as_ref() {
        return Ok(agents.clone());
    }
    let agents = Arc::new(Http1Agents::new(config)?);
    *slot = Some(agents.clone());
    Ok(agents)
}

/// Drop the process-wide agents. Later users get fresh ones.
pub fn destroy_global_agents() {
    GLOBAL_AGENTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

#[derive(Debug)]
pub struct Http1Transport {
    agents: AgentHandle<Arc<Http1Agents>>,
    global: bool,
    request_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl Http1Transport {
    /// With `global`, reuse the process-wide agents; `destroy` then still destroys them on close.
    pub fn new(config: &Http1Config, global: bool, destroy: bool) -> Result<Self, SetupError> {
        let agents = if global {
            AgentHandle::borrowed(global_agents(config)?, destroy)
        } else {
            AgentHandle::owned(Arc::new(Http1Agents::new(config)?))
        };
        Ok(Self {
            agents,
            global,
            request_timeout: millis(config.request_timeout_ms),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn begin_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn destroy(&self) {
        match self.agents.release() {
            Release::Destroyed if self.global => {
                tracing::debug!("Destroying global HTTP/1.1 agents");
                destroy_global_agents();
            }
            Release::Destroyed => tracing::debug!("HTTP/1.1 agents destroyed"),
            Release::Detached | Release::Empty => {}
        }
    }

    async fn acquire(agents: &Http1Agents) -> Result<Option<OwnedSemaphorePermit>, ForwardError> {
        match &agents.limiter {
            Some(limiter) => limiter
                .clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| closed_error()),
            None => Ok(None),
        }
    }
}

impl Dispatch for Http1Transport {
    async fn dispatch(&self, request: OutboundRequest) -> Result<DispatchOutcome, ForwardError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        let agents = self.agents.get().ok_or_else(closed_error)?;
        let timeout = request.head.timeout.or(self.request_timeout);

        if is_unix(&request.head.url) {
            return unix::dispatch(request, agents.unix_tls.clone(), timeout).await;
        }

        let permit = Self::acquire(&agents).await?;
        let https = request.head.url.scheme() == "https";
        let uri: Uri = request
            .head
            .url
            .as_str()
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| ForwardError::Internal(e.to_string()))?;

        let mut outbound = Request::new(request.body.into_body());
        *outbound.method_mut() = request.head.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = request.head.headers;

        let pending = if https {
            agents.https.request(outbound)
        } else {
            agents.http.request(outbound)
        };
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| ForwardError::RequestTimeout)?,
            None => pending.await,
        };
        let response = result.map_err(|e| ForwardError::from_http1(&e))?;
        Ok(DispatchOutcome::from_incoming(response, permit))
    }

    fn retry_on_error(&self) -> ErrorKind {
        ErrorKind::ConnectionReset
    }
}
