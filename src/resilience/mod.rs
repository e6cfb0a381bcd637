//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → retries.rs (dispatch, then ask the policy for a delay)
//!     → backoff.rs (jittered delay when the policy says retry)
//!     → sleep, dispatch again, or resolve with the last outcome
//! ```
//!
//! # Design Decisions
//! - Retries only for idempotent requests without a body (GET, HEAD, OPTIONS, TRACE)
//! - Only the transport's designated error kind is retried, plus `503` on GET
//! - Timeouts belong to the transports; every dispatch has a deadline unless disabled

pub mod backoff;
pub mod retries;

pub use retries::{RetryContext, RetryDelayFn, RetryPhase, RetryPolicy, RetryState, Retrier};
