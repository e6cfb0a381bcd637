//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → Forwarder → Listener
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → Stop accepting → Drain connections → Close forwarder → Exit
//! ```
//!
//! # Design Decisions
//! - Listeners start last (traffic only when ready)
//! - The forwarder closes after the server drained, so in-flight calls finish first

pub mod shutdown;

pub use shutdown::Shutdown;
