//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the standalone forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Forwarding core registration options.
    pub forwarding: ForwardingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// One upstream origin, or several picked round-robin.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BaseOrigins {
    One(String),
    Many(Vec<String>),
}

impl BaseOrigins {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            BaseOrigins::One(origin) => vec![origin.clone()],
            BaseOrigins::Many(origins) => origins.clone(),
        }
    }
}

/// Registration options of the forwarding core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Upstream origin(s). Without a base every source must be an absolute URL.
    pub base: Option<BaseOrigins>,

    /// Capacity of the composed-URL cache.
    pub cache_urls: usize,

    /// Skip the composed-URL cache entirely.
    pub disable_cache: bool,

    /// HTTP/1.1 agent settings. Presence selects the HTTP/1.1 strategy.
    pub http: Option<Http1Config>,

    /// HTTP/2 session settings. Presence forces the HTTP/2 strategy.
    pub http2: Option<Http2Config>,

    /// Pooled dispatcher settings (the default strategy).
    pub pooled: PooledConfig,

    /// Content types whose parsed bodies are re-encoded as JSON.
    pub content_types_to_encode: Vec<String>,

    /// Methods the default retry policy may retry.
    pub retry_methods: Vec<String>,

    /// Retries allowed on the transport's retryable error.
    pub retries_count: u32,

    /// Ceiling for GET retries on 503 when `retries_count` is 0.
    pub max_retries_on_503: u32,

    /// Suppress the per-call info logs.
    pub disable_request_logging: bool,

    /// Reuse the process-wide HTTP/1.1 agents instead of owning new ones.
    pub global_agent: bool,

    /// Destroy the process-wide agents on close even though they are shared.
    pub destroy_agent: bool,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            base: None,
            cache_urls: 100,
            disable_cache: false,
            http: None,
            http2: None,
            pooled: PooledConfig::default(),
            content_types_to_encode: vec!["application/json".to_string()],
            retry_methods: ["GET", "HEAD", "OPTIONS", "TRACE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            retries_count: 0,
            max_retries_on_503: 10,
            disable_request_logging: false,
            global_agent: false,
            destroy_agent: false,
        }
    }
}

impl ForwardingConfig {
    /// Configuration pointing at a single base origin, everything else default.
    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            base: Some(BaseOrigins::One(base.into())),
            ..Self::default()
        }
    }

    pub fn bases(&self) -> Vec<String> {
        self.base.as_ref().map(BaseOrigins::to_vec).unwrap_or_default()
    }
}

/// HTTP/1.1 agent configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http1Config {
    /// Keep idle connections for reuse.
    pub keep_alive: bool,

    /// How long an idle connection is kept, in milliseconds.
    pub keep_alive_msecs: u64,

    /// Ceiling on concurrent requests per agent (0 = unlimited).
    pub max_sockets: usize,

    /// Idle connections kept per host.
    pub max_free_sockets: usize,

    /// Connection establishment timeout in milliseconds (0 disables).
    pub connect_timeout_ms: u64,

    /// Time allowed until the response head arrives, in milliseconds (0 disables).
    pub request_timeout_ms: u64,

    /// Verify upstream TLS certificates.
    pub reject_unauthorized: bool,
}

impl Default for Http1Config {
    fn default() -> Self {
        Self {
            keep_alive: true,
            keep_alive_msecs: 60_000,
            max_sockets: 0,
            max_free_sockets: 256,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            reject_unauthorized: true,
        }
    }
}

/// HTTP/2 session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http2Config {
    /// Idle time after which a session is destroyed, in milliseconds (0 disables).
    pub session_timeout_ms: u64,

    /// Per-stream timeout in milliseconds (0 disables).
    pub request_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds (0 disables).
    pub connect_timeout_ms: u64,

    /// Verify upstream TLS certificates.
    pub reject_unauthorized: bool,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            session_timeout_ms: 60_000,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            reject_unauthorized: true,
        }
    }
}

/// Pooled dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PooledConfig {
    /// Use the pooled dispatcher when no other strategy is configured.
    pub enabled: bool,

    /// Idle connections kept per origin. Open connections are not capped.
    pub connections: usize,

    /// Requests in flight per connection. Only 1 is supported.
    pub pipelining: usize,

    pub connect_timeout_ms: u64,

    /// Whole-request timeout in milliseconds (0 disables).
    pub request_timeout_ms: u64,

    /// Idle connection lifetime in milliseconds.
    pub keep_alive_timeout_ms: u64,

    pub reject_unauthorized: bool,

    /// Upstream proxy URL every request is sent through.
    pub proxy: Option<String>,
}

impl Default for PooledConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connections: 128,
            pipelining: 1,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 0,
            keep_alive_timeout_ms: 4_000,
            reject_unauthorized: true,
            proxy: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format: "compact" or "pretty".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Milliseconds to an optional duration, 0 meaning disabled.
pub fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
