//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → server.rs (Axum router, request ID, tracing)
//!     → forward (orchestrator)
//!         → url.rs + url_cache.rs (destination URL, memoized)
//!         → headers.rs (pseudo-header and hop-by-hop filtering)
//!     → upstream response streamed back
//! ```

pub mod headers;
pub mod request;
pub mod server;
pub mod url;
pub mod url_cache;

pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::ForwardServer;
