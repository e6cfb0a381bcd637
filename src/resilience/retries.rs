//! Retry coordination for one forwarded call.
//!
//! # Responsibilities
//! - Drive `Pending → Dispatching → {Succeeded, Retrying, Failed}`, sleeping between attempts
//! - Compute the default delay: idempotent methods without a body only, jittered delays on the
//!   transport's retryable error, `Retry-After` aware retries of `503` on GET
//! - Hand custom policies a context that can fall back to the default
//!
//! # Design Decisions
//! - Attempts are strictly sequential; the next one starts after the previous resolved
//! - A zero or absent delay means "do not retry"
//! - A streamed request body can be sent once, so it is never retried
//! - A response that triggers a retry is discarded before waiting

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, Method, StatusCode};

use crate::error::{ErrorKind, ForwardError};
use crate::observability::metrics;
use crate::resilience::backoff::jittered_delay;
use crate::transport::{Dispatch, DispatchOutcome, OutboundRequest, RequestHead};

/// Custom retry policy: a delay schedules a retry, `None` does not.
pub type RetryDelayFn = Arc<dyn Fn(&RetryContext<'_>) -> Option<Duration> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Pending,
    Dispatching,
    Retrying,
    Succeeded,
    Failed,
}

/// Per-call retry bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub phase: RetryPhase,
    /// Retries scheduled so far.
    pub attempt: u32,
    pub retries_count: u32,
    /// Delay computed for the last scheduled retry.
    pub delay: Option<Duration>,
}

impl RetryState {
    fn new(retries_count: u32) -> Self {
        Self {
            phase: RetryPhase::Pending,
            attempt: 0,
            retries_count,
            delay: None,
        }
    }
}

/// What a retry policy sees after each attempt.
pub struct RetryContext<'a> {
    pub error: Option<&'a ForwardError>,
    pub request: &'a RequestHead,
    pub response: Option<&'a DispatchOutcome>,
    pub attempt: u32,
    pub retries_count: u32,
    policy: &'a RetryPolicy,
    retry_on_error: ErrorKind,
}

impl RetryContext<'_> {
    /// The built-in policy's answer for this attempt.
    pub fn get_default_delay(&self) -> Option<Duration> {
        self.policy.default_delay(self)
    }
}

/// Retry settings effective for one call.
#[derive(Clone)]
pub struct RetryPolicy {
    pub retry_methods: Vec<Method>,
    pub retries_count: u32,
    pub max_retries_on_503: u32,
    pub custom: Option<RetryDelayFn>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retry_methods", &self.retry_methods)
            .field("retries_count", &self.retries_count)
            .field("max_retries_on_503", &self.max_retries_on_503)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE],
            retries_count: 0,
            max_retries_on_503: 10,
            custom: None,
        }
    }
}

impl RetryPolicy {
    pub fn default_delay(&self, ctx: &RetryContext<'_>) -> Option<Duration> {
        let method = &ctx.request.method;
        if !self.retry_methods.contains(method)
            || ctx.request.headers.contains_key(header::CONTENT_LENGTH)
        {
            return None;
        }

        if let Some(err) = ctx.error {
            if err.kind() == ctx.retry_on_error && ctx.retries_count > ctx.attempt {
                return Some(jittered_delay(ctx.attempt));
            }
        }

        if let Some(response) = ctx.response {
            if response.status == StatusCode::SERVICE_UNAVAILABLE
                && *method == Method::GET
                && ctx.retries_count == 0
                && ctx.attempt < self.max_retries_on_503
            {
                return Some(
                    retry_after(&response.headers).unwrap_or_else(|| jittered_delay(ctx.attempt)),
                );
            }
        }
        None
    }

    fn delay(&self, ctx: &RetryContext<'_>) -> Option<Duration> {
        let delay = match &self.custom {
            Some(custom) => custom(ctx),
            None => self.default_delay(ctx),
        };
        delay.filter(|d| !d.is_zero())
    }
}

/// `Retry-After` in delta-seconds. HTTP-dates and zero are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds: u64 = headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn reason(result: &Result<DispatchOutcome, ForwardError>) -> &'static str {
    match result {
        Ok(_) => "status",
        Err(err) => err.kind().as_str(),
    }
}

/// Runs the attempts of one call against a transport.
pub struct Retrier<'a, D> {
    transport: &'a D,
    transport_name: &'static str,
    policy: &'a RetryPolicy,
    state: RetryState,
}

impl<'a, D: Dispatch> Retrier<'a, D> {
    pub fn new(transport: &'a D, transport_name: &'static str, policy: &'a RetryPolicy) -> Self {
        Self {
            transport,
            transport_name,
            policy,
            state: RetryState::new(policy.retries_count),
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub async fn run(&mut self, request: OutboundRequest) -> Result<DispatchOutcome, ForwardError> {
        let OutboundRequest { head, mut body } = request;
        loop {
            self.state.phase = RetryPhase::Dispatching;
            let current = std::mem::take(&mut body);
            let replay = current.try_clone();

            let result = self
                .transport
                .dispatch(OutboundRequest {
                    head: head.clone(),
                    body: current,
                })
                .await;

            let delay = {
                let ctx = RetryContext {
                    error: result.as_ref().err(),
                    request: &head,
                    response: result.as_ref().ok(),
                    attempt: self.state.attempt,
                    retries_count: self.state.retries_count,
                    policy: self.policy,
                    retry_on_error: self.transport.retry_on_error(),
                };
                self.policy.delay(&ctx)
            };

            let (Some(delay), Some(replay)) = (delay, replay) else {
                self.state.phase = if result.is_ok() {
                    RetryPhase::Succeeded
                } else {
                    RetryPhase::Failed
                };
                return result;
            };

            self.state.phase = RetryPhase::Retrying;
            self.state.delay = Some(delay);
            tracing::debug!(
                attempt = self.state.attempt,
                delay_ms = delay.as_millis() as u64,
                reason = reason(&result),
                url = %head.url,
                "Retrying forwarded request"
            );
            metrics::record_retry(self.transport_name, reason(&result));
            if let Ok(outcome) = result {
                outcome.discard();
            }

            tokio::time::sleep(delay).await;
            self.state.attempt += 1;
            body = replay;
        }
    }
}
