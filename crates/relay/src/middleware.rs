//! Middleware chain around every orchestrated call.
//!
//! Hooks run in registration order on the way into the reliability stack and
//! in reverse order on the way out. A hook may short-circuit the call by
//! producing a response from `before`; the hooks that already ran still see
//! the result in their `after` pass.

use async_trait::async_trait;
use relay_core::{Binding, ChatRequest, ChatResponse, RelayError, RequestId, Result};
use std::time::{Duration, Instant};

/// Shared mutable state threaded through the middleware chain.
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Binding the call is addressed to.
    pub binding: Binding,
    /// The request; hooks may rewrite it before the provider sees it.
    pub request: ChatRequest,
    /// The response, once produced by a hook or the reliability stack.
    pub response: Option<ChatResponse>,
    /// The classified error, once the call has failed.
    pub error: Option<RelayError>,
    /// When the call entered the chain.
    pub started_at: Instant,
    /// When the innermost step finished.
    pub finished_at: Option<Instant>,
    /// Call identifier.
    pub request_id: RequestId,
}

impl MiddlewareContext {
    /// Context for a call about to descend the chain.
    #[must_use]
    pub fn new(binding: Binding, request: ChatRequest) -> Self {
        let request_id = request.id;
        Self {
            binding,
            request,
            response: None,
            error: None,
            started_at: Instant::now(),
            finished_at: None,
            request_id,
        }
    }

    /// Wall-clock time spent in the innermost step, once finished.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.finished_at
            .map(|finished| finished.duration_since(self.started_at))
    }
}

/// An ordered hook around every call.
///
/// Both methods default to pass-through, so a hook implements only the side
/// it cares about. An error from either side aborts the chain; it is
/// classified and surfaced to the caller.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Runs on the way into the reliability stack, in registration order.
    ///
    /// Returning `Ok(Some(response))` short-circuits: later hooks and the
    /// provider call are skipped.
    ///
    /// # Errors
    /// An error aborts the call.
    async fn before(&self, cx: &mut MiddlewareContext) -> Result<Option<ChatResponse>> {
        let _ = cx;
        Ok(None)
    }

    /// Runs on the way out, in reverse registration order, with the response
    /// or error populated.
    ///
    /// # Errors
    /// An error replaces the call's outcome.
    async fn after(&self, cx: &mut MiddlewareContext) -> Result<()> {
        let _ = cx;
        Ok(())
    }
}
