//! Ordered fallback over candidate bindings.
//!
//! Tries each spec in order, advancing on any exhausted or non-recoverable
//! error. Breaker rejections and configuration errors never halt the chain;
//! caller cancellation is returned as-is.

use crate::orchestrator::{CallSpec, Orchestrator};
use relay_core::{CancelToken, ChatRequest, ChatResponse, ErrorKind, RelayError, Result};
use std::sync::Arc;
use tracing::debug;

/// A prepared fallback call over an ordered spec list.
pub struct FallbackCall {
    orchestrator: Arc<Orchestrator>,
    specs: Vec<CallSpec>,
}

impl Orchestrator {
    /// Prepare a sequential try-next-on-failure call over `specs`.
    #[must_use]
    pub fn fallback(self: &Arc<Self>, specs: Vec<CallSpec>) -> FallbackCall {
        FallbackCall {
            orchestrator: Arc::clone(self),
            specs,
        }
    }
}

impl FallbackCall {
    /// Execute the fallback chain.
    ///
    /// # Errors
    /// Returns the first success, otherwise the **last** spec's error.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_with(request, CancelToken::new()).await
    }

    /// Execute the fallback chain under the caller's cancellation scope.
    ///
    /// # Errors
    /// See [`FallbackCall::chat`].
    pub async fn chat_with(
        &self,
        request: ChatRequest,
        cancel: CancelToken,
    ) -> Result<ChatResponse> {
        let request_id = request.id;
        let mut last: Option<RelayError> = None;

        for spec in &self.specs {
            if let Some(kind) = cancel.cause() {
                return Err(RelayError::from_cancel(kind).with_request_id(request_id));
            }

            let mut attempt = request.clone();
            attempt.provider = Some(spec.provider.clone());
            attempt.model = spec.model.clone();

            match self.orchestrator.chat_with(attempt, cancel.child()).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    // Caller cancellation is never re-wrapped or swallowed.
                    if error.kind == ErrorKind::Canceled {
                        return Err(error);
                    }
                    debug!(spec = %spec, error = %error, "fallback advancing to next spec");
                    last = Some(error);
                }
            }
        }

        Err(last.unwrap_or_else(|| {
            RelayError::config("fallback requires at least one spec").with_request_id(request_id)
        }))
    }
}
