//! Forwarding error taxonomy.
//!
//! # Responsibilities
//! - Define every caller-visible failure of a forwarded call
//! - Map each failure to a status code and a stable external code
//! - Classify raw transport errors (hyper, hyper-util, reqwest, io)
//! - Render errors as the JSON body external clients observe
//!
//! # Design Decisions
//! - Timeouts are distinct internally but share one external code
//! - Programmer errors are returned before any network I/O and never retried
//! - Classification walks the `source()` chain instead of matching on messages

use std::error::Error as StdError;
use std::io;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Internal failure class; transports advertise one of these as retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RequestTimeout,
    Http2RequestTimeout,
    Http2SessionTimeout,
    ServiceUnavailable,
    ConnectionReset,
    ConnectTimeout,
    SocketError,
    BadGateway,
    Internal,
    InvalidSource,
    UnsupportedBodyStream,
    BodyNotAllowed,
    UnixSocketUnsupported,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::Http2RequestTimeout => "http2_request_timeout",
            ErrorKind::Http2SessionTimeout => "http2_session_timeout",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::SocketError => "socket_error",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::Internal => "internal",
            ErrorKind::InvalidSource => "invalid_source",
            ErrorKind::UnsupportedBodyStream => "unsupported_body_stream",
            ErrorKind::BodyNotAllowed => "body_not_allowed",
            ErrorKind::UnixSocketUnsupported => "unix_socket_unsupported",
        }
    }
}

/// A failed forwarded call.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// HTTP/1.1 (or pooled dispatcher) request exceeded its timeout.
    #[error("Gateway Timeout")]
    RequestTimeout,

    /// An HTTP/2 stream exceeded the request timeout and was cancelled.
    #[error("HTTP/2 request timed out")]
    Http2RequestTimeout,

    /// The HTTP/2 session went idle past its timeout while the stream was pending.
    #[error("HTTP/2 session timed out")]
    Http2SessionTimeout,

    #[error("Service Unavailable")]
    ServiceUnavailable { reason: String },

    #[error("Connection Reset")]
    ConnectionReset,

    #[error("Connect Timeout")]
    ConnectTimeout,

    #[error("Socket Error")]
    SocketError { reason: String },

    /// The upstream response was rejected by `validate_response`.
    #[error("Bad Gateway")]
    BadGateway,

    #[error("{0}")]
    Internal(String),

    #[error("source must be a relative path that stays within the configured base: {0:?}")]
    InvalidSource(String),

    #[error("sending a new body as a stream is not supported")]
    UnsupportedBodyStream,

    #[error("rewriting the body when doing a {0} is not allowed")]
    BodyNotAllowed(Method),

    #[error("unix socket destinations are not supported by the {0} transport")]
    UnixSocketUnsupported(&'static str),
}

/// Failure to build a forwarder from its registration options.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid forwarding configuration: {}", join_errors(.0))]
    Config(Vec<crate::config::validation::ValidationError>),

    #[error("TLS initialization failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("failed to build the pooled dispatcher: {0}")]
    Dispatcher(#[from] reqwest::Error),
}

fn join_errors(errors: &[crate::config::validation::ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// JSON body for error responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub code: &'static str,
    pub error: &'static str,
    pub message: String,
}

impl ForwardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForwardError::RequestTimeout => ErrorKind::RequestTimeout,
            ForwardError::Http2RequestTimeout => ErrorKind::Http2RequestTimeout,
            ForwardError::Http2SessionTimeout => ErrorKind::Http2SessionTimeout,
            ForwardError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ForwardError::ConnectionReset => ErrorKind::ConnectionReset,
            ForwardError::ConnectTimeout => ErrorKind::ConnectTimeout,
            ForwardError::SocketError { .. } => ErrorKind::SocketError,
            ForwardError::BadGateway => ErrorKind::BadGateway,
            ForwardError::Internal(_) => ErrorKind::Internal,
            ForwardError::InvalidSource(_) => ErrorKind::InvalidSource,
            ForwardError::UnsupportedBodyStream => ErrorKind::UnsupportedBodyStream,
            ForwardError::BodyNotAllowed(_) => ErrorKind::BodyNotAllowed,
            ForwardError::UnixSocketUnsupported(_) => ErrorKind::UnixSocketUnsupported,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::RequestTimeout
            | ErrorKind::Http2RequestTimeout
            | ErrorKind::Http2SessionTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::BadGateway => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable external code.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::RequestTimeout
            | ErrorKind::Http2RequestTimeout
            | ErrorKind::Http2SessionTimeout => "FORWARD_GATEWAY_TIMEOUT",
            ErrorKind::ServiceUnavailable => "FORWARD_SERVICE_UNAVAILABLE",
            ErrorKind::ConnectionReset => "FORWARD_CONNECTION_RESET",
            ErrorKind::ConnectTimeout => "FORWARD_CONNECT_TIMEOUT",
            ErrorKind::SocketError => "FORWARD_SOCKET_ERROR",
            ErrorKind::BadGateway => "FORWARD_BAD_GATEWAY",
            ErrorKind::Internal => "FORWARD_INTERNAL_SERVER_ERROR",
            ErrorKind::InvalidSource => "FORWARD_INVALID_SOURCE",
            ErrorKind::UnsupportedBodyStream => "FORWARD_UNSUPPORTED_BODY_STREAM",
            ErrorKind::BodyNotAllowed => "FORWARD_BODY_NOT_ALLOWED",
            ErrorKind::UnixSocketUnsupported => "FORWARD_UNIX_SOCKET_UNSUPPORTED",
        }
    }

    /// True for errors raised before dispatch because of caller misuse.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidSource
                | ErrorKind::UnsupportedBodyStream
                | ErrorKind::BodyNotAllowed
                | ErrorKind::UnixSocketUnsupported
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        let status = self.status();
        ErrorBody {
            status_code: status.as_u16(),
            code: self.code(),
            error: status.canonical_reason().unwrap_or("Unknown"),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let body = self.to_body();
        let json = serde_json::to_vec(&body).unwrap_or_default();
        let mut response = (self.status(), json).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response
    }
}

/// Render an error and its whole source chain as one message.
pub(crate) fn chain_message(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// First io error kind found in the source chain.
pub(crate) fn io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

fn find_hyper<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a hyper::Error> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            return Some(hyper_err);
        }
        current = e.source();
    }
    None
}

/// Whether the peer went away mid-exchange (reset, broken pipe, or EOF before the head).
pub(crate) fn is_reset(err: &(dyn StdError + 'static)) -> bool {
    if matches!(
        io_kind(err),
        Some(io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted)
    ) {
        return true;
    }
    find_hyper(err).is_some_and(|e| e.is_incomplete_message())
}

fn is_unreachable(kind: Option<io::ErrorKind>) -> bool {
    matches!(
        kind,
        Some(
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotFound
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::TimedOut
        )
    )
}

impl ForwardError {
    /// Failure to open a connection (DNS, refused, unreachable).
    pub(crate) fn from_connect(err: &(dyn StdError + 'static)) -> Self {
        ForwardError::ServiceUnavailable { reason: chain_message(err) }
    }

    /// Classify an error from the HTTP/1.1 agents.
    pub(crate) fn from_http1(err: &hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            return Self::from_connect(err);
        }
        Self::from_hyper_chain(err)
    }

    /// Classify a `hyper` connection-level error (HTTP/1 over unix sockets, HTTP/2 streams).
    pub(crate) fn from_hyper_chain(err: &(dyn StdError + 'static)) -> Self {
        if is_reset(err) {
            return ForwardError::ConnectionReset;
        }
        if find_hyper(err).is_some_and(|e| e.is_canceled()) {
            return ForwardError::ServiceUnavailable { reason: chain_message(err) };
        }
        if is_unreachable(io_kind(err)) {
            return Self::from_connect(err);
        }
        ForwardError::Internal(chain_message(err))
    }

    /// Classify an error from the pooled dispatcher.
    pub(crate) fn from_pooled(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            if err.is_timeout() || io_kind(err) == Some(io::ErrorKind::TimedOut) {
                return ForwardError::ConnectTimeout;
            }
            return Self::from_connect(err);
        }
        if err.is_timeout() {
            return ForwardError::RequestTimeout;
        }
        if is_reset(err) {
            return ForwardError::SocketError { reason: chain_message(err) };
        }
        ForwardError::Internal(chain_message(err))
    }
}
