//! HTTP request forwarding core.
//!
//! Composes an outbound request from an inbound one, dispatches it over HTTP/1.1,
//! HTTP/2 or a pooled dispatcher with idempotent-only retries, and streams the
//! upstream response back.

// Core subsystems
pub mod config;
pub mod error;
pub mod forward;
pub mod http;
pub mod transport;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::{ForwardingConfig, ProxyConfig};
pub use error::{ForwardError, SetupError};
pub use forward::{ForwardOptions, Forwarder, ForwarderBuilder, InboundBody, InboundRequest, Reply};
pub use http::ForwardServer;
pub use lifecycle::Shutdown;
pub use transport::Ownership;
