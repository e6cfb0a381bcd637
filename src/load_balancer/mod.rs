//! Upstream origin selection.
//!
//! # Data Flow
//! ```text
//! forward() called
//!     → round_robin.rs (rotate through configured base origins)
//!     → get_upstream option may replace the pick
//!     → URL composer resolves the source against the chosen origin
//! ```

pub mod round_robin;

pub use round_robin::RoundRobin;

/// Strategy choosing the base origin for the next forwarded call.
pub trait OriginSelector: Send + Sync {
    /// `None` when no base origin is configured.
    fn next_origin(&self) -> Option<&str>;
}
