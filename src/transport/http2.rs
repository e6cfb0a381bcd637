//! HTTP/2 strategy over one multiplexed session per origin.
//!
//! # Session lifecycle
//! ```text
//! Absent ──dispatch──▶ Connecting ──handshake ok──▶ Active ──idle timeout / GOAWAY / error──▶ Absent
//!                          │                          │
//!                          └──failed / timed out──▶ Absent        close()──▶ Draining ──▶ Destroyed
//! ```
//!
//! Absent and Destroyed origins have no map entry.
//!
//! # Design Decisions
//! - Concurrent dispatches to a connecting origin await the same handshake
//! - The handshake (TCP, TLS, HTTP/2 preface) runs in its own task under `connect_timeout`
//!   and settles its map entry whether or not anyone still awaits it
//! - The request timeout covers session acquisition, stream admission and the exchange
//! - A driver task owns the connection and its idle timer; stream opens, response heads and
//!   body chunks reset the timer
//! - The ending reason is published on a watch channel so pending streams can tell an idle
//!   session timeout from a plain close
//! - A request timeout drops only its own stream, which resets it with CANCEL

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, Response, Uri, Version},
};
use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt, StreamExt,
};
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio_rustls::TlsConnector;
use url::Url;

use super::{closed_error, tls, Dispatch, DispatchOutcome, OutboundRequest, RequestBody, RequestHead};
use crate::config::schema::{millis, Http2Config};
use crate::error::{chain_message, is_reset, ErrorKind, ForwardError, SetupError};
use crate::http::headers::strip_hop_by_hop_headers;
use crate::http::url::is_unix;
use crate::observability::metrics;

/// Why a session's driver stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    IdleTimeout,
    Closed,
    Failed(String),
}

impl SessionEnd {
    fn into_error(self) -> ForwardError {
        match self {
            SessionEnd::IdleTimeout => ForwardError::Http2SessionTimeout,
            SessionEnd::Closed => ForwardError::ServiceUnavailable {
                reason: "HTTP/2 session closed".to_string(),
            },
            SessionEnd::Failed(reason) => ForwardError::ServiceUnavailable { reason },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SessionEnd::IdleTimeout => "idle_timeout",
            SessionEnd::Closed => "closed",
            SessionEnd::Failed(_) => "failed",
        }
    }
}

struct Session {
    id: u64,
    sender: Mutex<http2::SendRequest<Body>>,
    activity: Arc<Notify>,
    ended: watch::Receiver<Option<SessionEnd>>,
    shutdown: Arc<Notify>,
}

impl Session {
    fn sender(&self) -> http2::SendRequest<Body> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn end_reason(&self) -> Option<SessionEnd> {
        self.ended.borrow().clone()
    }

    fn is_usable(&self) -> bool {
        self.end_reason().is_none() && !self.sender().is_closed()
    }

    fn touch(&self) {
        self.activity.notify_one();
    }
}

type Handshake = Shared<BoxFuture<'static, Result<Arc<Session>, String>>>;

enum SessionState {
    Connecting { id: u64, handshake: Handshake },
    Active(Arc<Session>),
    Draining(Arc<Session>),
}

impl SessionState {
    fn id(&self) -> u64 {
        match self {
            SessionState::Connecting { id, .. } => *id,
            SessionState::Active(session) | SessionState::Draining(session) => session.id,
        }
    }
}

type SessionMap = Mutex<HashMap<String, SessionState>>;

pub struct Http2Transport {
    config: Http2Config,
    tls: Arc<rustls::ClientConfig>,
    sessions: Arc<SessionMap>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Http2Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Transport")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn lock(sessions: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<String, SessionState>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drop the established session `id` of `origin`, if it still holds the slot.
fn remove_session(sessions: &SessionMap, origin: &str, id: u64) {
    let mut sessions = lock(sessions);
    let ours = matches!(
        sessions.get(origin),
        Some(state @ (SessionState::Active(_) | SessionState::Draining(_))) if state.id() == id
    );
    if ours {
        sessions.remove(origin);
    }
}

/// Record a finished handshake. Success takes the slot only while it still belongs to
/// this handshake; otherwise the new session is shut down again.
fn settle(
    sessions: &Weak<SessionMap>,
    origin: &str,
    id: u64,
    result: Result<Arc<Session>, String>,
) -> Result<Arc<Session>, String> {
    let Some(sessions) = sessions.upgrade() else {
        if let Ok(session) = &result {
            session.shutdown.notify_one();
        }
        return Err(format!("HTTP/2 session to {origin} discarded, transport dropped"));
    };
    let mut sessions = lock(&sessions);
    let ours = matches!(
        sessions.get(origin),
        Some(SessionState::Connecting { id: current, .. }) if *current == id
    );
    match result {
        Ok(session) if ours => {
            metrics::record_session("connect");
            sessions.insert(origin.to_string(), SessionState::Active(session.clone()));
            Ok(session)
        }
        Ok(session) => {
            session.shutdown.notify_one();
            Err(format!("HTTP/2 session to {origin} discarded, transport closing"))
        }
        Err(reason) => {
            tracing::debug!(origin, session_id = id, reason = %reason, "HTTP/2 handshake failed");
            metrics::record_session("handshake_failed");
            if ours {
                sessions.remove(origin);
            }
            Err(reason)
        }
    }
}

/// TCP connect, TLS for `https`, then the HTTP/2 preface.
async fn handshake(
    driver: Driver,
    url: &Url,
    tls: Arc<rustls::ClientConfig>,
) -> Result<Arc<Session>, String> {
    let host = url
        .host_str()
        .ok_or_else(|| format!("{url} has no host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| format!("{url} has no port"))?;

    tracing::debug!(origin = %driver.origin, session_id = driver.id, "Connecting HTTP/2 session");
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| chain_message(&e))?;
    let _ = stream.set_nodelay(true);

    if url.scheme() == "https" {
        let name = ServerName::try_from(host).map_err(|e| e.to_string())?;
        let stream = TlsConnector::from(tls)
            .connect(name, stream)
            .await
            .map_err(|e| chain_message(&e))?;
        driver.start(stream).await
    } else {
        driver.start(stream).await
    }
}

impl Http2Transport {
    pub fn new(config: Http2Config) -> Result<Self, SetupError> {
        let tls = tls::client_config(config.reject_unauthorized, &[tls::ALPN_H2])?;
        Ok(Self {
            config,
            tls: Arc::new(tls),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// The active session for `origin`, connecting if there is none.
    async fn session(&self, origin: &str, url: &Url) -> Result<Arc<Session>, ForwardError> {
        let handshake = {
            let mut sessions = lock(&self.sessions);
            match sessions.get(origin) {
                Some(SessionState::Active(session)) if session.is_usable() => {
                    tracing::trace!(origin, session_id = session.id, "Reusing HTTP/2 session");
                    return Ok(session.clone());
                }
                Some(SessionState::Connecting { handshake, .. }) => handshake.clone(),
                Some(SessionState::Draining(_)) => return Err(closed_error()),
                _ if self.closed.load(Ordering::SeqCst) => return Err(closed_error()),
                _ => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let handshake = self.connect(id, origin.to_string(), url.clone());
                    sessions.insert(
                        origin.to_string(),
                        SessionState::Connecting {
                            id,
                            handshake: handshake.clone(),
                        },
                    );
                    handshake
                }
            }
        };

        handshake
            .await
            .map_err(|reason| ForwardError::ServiceUnavailable { reason })
    }

    /// Forget a session that stopped accepting streams so the next lookup reconnects.
    fn invalidate(&self, origin: &str, id: u64) {
        remove_session(&self.sessions, origin, id);
    }

    /// Spawn the handshake of session `id`. It keeps running when every waiter gives up,
    /// so a stalled peer holds the slot for at most `connect_timeout`.
    fn connect(&self, id: u64, origin: String, url: Url) -> Handshake {
        let tls = self.tls.clone();
        let connect_timeout = millis(self.config.connect_timeout_ms);
        let sessions = Arc::downgrade(&self.sessions);
        let driver = Driver {
            id,
            origin: origin.clone(),
            session_timeout: millis(self.config.session_timeout_ms),
            sessions: sessions.clone(),
        };

        let task = tokio::spawn(async move {
            let connecting = handshake(driver, &url, tls);
            let result = match connect_timeout {
                Some(limit) => tokio::time::timeout(limit, connecting)
                    .await
                    .unwrap_or_else(|_| Err(format!("HTTP/2 handshake with {origin} timed out"))),
                None => connecting.await,
            };
            settle(&sessions, &origin, id, result)
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(format!("HTTP/2 handshake task failed: {e}")))
        }
        .boxed()
        .shared()
    }

    pub(crate) fn begin_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut sessions = lock(&self.sessions);
        for state in sessions.values_mut() {
            if let SessionState::Active(session) = state {
                *state = SessionState::Draining(session.clone());
            }
        }
    }

    pub(crate) fn destroy(&self) {
        let mut sessions = lock(&self.sessions);
        for (origin, state) in sessions.drain() {
            if let SessionState::Draining(session) | SessionState::Active(session) = state {
                tracing::debug!(origin = %origin, session_id = session.id, "Destroying HTTP/2 session");
                session.shutdown.notify_one();
            }
        }
    }

    /// Acquire a session, wait for stream capacity and exchange the request head.
    async fn open_stream(
        &self,
        origin: &str,
        head: RequestHead,
        body: RequestBody,
    ) -> Result<(Arc<Session>, Response<hyper::body::Incoming>), ForwardError> {
        let mut session = self.session(origin, &head.url).await?;
        let mut sender = session.sender();
        if sender.ready().await.is_err() {
            tracing::debug!(origin, session_id = session.id, "HTTP/2 session refused new streams, reconnecting");
            self.invalidate(origin, session.id);
            session = self.session(origin, &head.url).await?;
            sender = session.sender();
            sender.ready().await.map_err(|e| ForwardError::ServiceUnavailable {
                reason: chain_message(&e),
            })?;
        }

        let uri: Uri = head
            .url
            .as_str()
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| ForwardError::Internal(e.to_string()))?;
        let mut headers = head.headers;
        strip_hop_by_hop_headers(&mut headers);
        let body = if head.method == Method::GET || head.method == Method::HEAD {
            Body::empty()
        } else {
            body.into_body()
        };

        let mut outbound = Request::new(body);
        *outbound.method_mut() = head.method;
        *outbound.uri_mut() = uri;
        *outbound.version_mut() = Version::HTTP_2;
        *outbound.headers_mut() = headers;

        session.touch();
        let stream = sender.send_request(outbound);
        let ended = session_ended(session.ended.clone());
        let response: Result<Response<hyper::body::Incoming>, ForwardError> = tokio::select! {
            biased;
            end = ended => Err(end.into_error()),
            result = stream => result.map_err(|e| {
                session.end_reason().map(SessionEnd::into_error).unwrap_or_else(|| stream_error(&e))
            }),
        };
        Ok((session, response?))
    }
}

/// Connection driver of one session.
struct Driver {
    id: u64,
    origin: String,
    session_timeout: Option<Duration>,
    sessions: Weak<SessionMap>,
}

impl Driver {
    async fn start<S>(self, stream: S) -> Result<Arc<Session>, String>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, connection) = http2::Builder::new(TokioExecutor::new())
            .timer(TokioTimer::new())
            .handshake::<_, Body>(TokioIo::new(stream))
            .await
            .map_err(|e| chain_message(&e))?;

        let (ended_tx, ended_rx) = watch::channel(None);
        let activity = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());
        let session = Arc::new(Session {
            id: self.id,
            sender: Mutex::new(sender),
            activity: activity.clone(),
            ended: ended_rx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(async move {
            let end = self.run(connection, &activity, &shutdown).await;
            tracing::debug!(
                origin = %self.origin,
                session_id = self.id,
                reason = end.label(),
                "HTTP/2 session ended"
            );
            metrics::record_session(end.label());
            ended_tx.send_replace(Some(end));
            if let Some(sessions) = self.sessions.upgrade() {
                remove_session(&sessions, &self.origin, self.id);
            }
        });
        Ok(session)
    }

    async fn run<C>(&self, connection: C, activity: &Notify, shutdown: &Notify) -> SessionEnd
    where
        C: std::future::Future<Output = hyper::Result<()>>,
    {
        tokio::pin!(connection);
        loop {
            let idle = async {
                match self.session_timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                result = &mut connection => {
                    return match result {
                        Ok(()) => SessionEnd::Closed,
                        Err(e) => SessionEnd::Failed(chain_message(&e)),
                    };
                }
                _ = activity.notified() => continue,
                _ = idle => return SessionEnd::IdleTimeout,
                _ = shutdown.notified() => return SessionEnd::Closed,
            }
        }
    }
}

/// Wait until the session publishes its ending reason.
async fn session_ended(mut ended: watch::Receiver<Option<SessionEnd>>) -> SessionEnd {
    match ended.wait_for(Option::is_some).await {
        Ok(end) => end.clone().unwrap_or(SessionEnd::Closed),
        Err(_) => SessionEnd::Closed,
    }
}

fn stream_error(err: &hyper::Error) -> ForwardError {
    if is_reset(err) {
        ForwardError::ConnectionReset
    } else {
        ForwardError::ServiceUnavailable {
            reason: chain_message(err),
        }
    }
}

impl Dispatch for Http2Transport {
    async fn dispatch(&self, request: OutboundRequest) -> Result<DispatchOutcome, ForwardError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        if is_unix(&request.head.url) {
            return Err(ForwardError::UnixSocketUnsupported("http2"));
        }

        let OutboundRequest { head, body } = request;
        let origin = head.url.origin().ascii_serialization();
        let timeout = head.timeout.or(millis(self.config.request_timeout_ms));

        let opening = self.open_stream(&origin, head, body);
        let (session, response) = match timeout {
            Some(limit) => match tokio::time::timeout(limit, opening).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::debug!(origin = %origin, "HTTP/2 request timed out, cancelling");
                    return Err(ForwardError::Http2RequestTimeout);
                }
            },
            None => opening.await?,
        };
        session.touch();

        let (parts, incoming) = response.into_parts();
        let activity = session.activity.clone();
        let stream = Body::new(incoming).into_data_stream().map(move |chunk| {
            activity.notify_one();
            chunk
        });
        Ok(DispatchOutcome {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body: Body::from_stream(stream),
        })
    }

    fn retry_on_error(&self) -> ErrorKind {
        ErrorKind::ConnectionReset
    }
}
