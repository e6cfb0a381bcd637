//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → ForwardingConfig handed to the Forwarder once, at registration
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the transport strategy is chosen from it once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BaseOrigins;
pub use schema::ForwardingConfig;
pub use schema::Http1Config;
pub use schema::Http2Config;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::PooledConfig;
pub use schema::ProxyConfig;
