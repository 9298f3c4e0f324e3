//! Concurrent race over candidate bindings.
//!
//! Dispatches every spec at once under a shared cancellation scope. The
//! first success cancels its siblings and wins; sibling errors after the win
//! are suppressed. When every sibling fails, the caller receives a single
//! `AllFailed` error carrying the per-spec causes in input order.

use crate::orchestrator::{CallSpec, Orchestrator};
use relay_core::{
    CancelKind, CancelToken, ChatRequest, ChatResponse, RelayError, Result,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

/// A prepared race over a spec list.
pub struct RaceCall {
    orchestrator: Arc<Orchestrator>,
    specs: Vec<CallSpec>,
}

type Joined = std::result::Result<(usize, Result<ChatResponse>), tokio::task::JoinError>;

enum Step {
    Canceled(CancelKind),
    Joined(Option<Joined>),
}

impl Orchestrator {
    /// Prepare a first-success-wins race over `specs`.
    #[must_use]
    pub fn race(self: &Arc<Self>, specs: Vec<CallSpec>) -> RaceCall {
        RaceCall {
            orchestrator: Arc::clone(self),
            specs,
        }
    }
}

impl RaceCall {
    /// Execute the race.
    ///
    /// # Errors
    /// Returns `AllFailed` with per-spec causes when every sibling fails,
    /// or `Canceled` when the caller cancels first.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_with(request, CancelToken::new()).await
    }

    /// Execute the race under the caller's cancellation scope.
    ///
    /// # Errors
    /// See [`RaceCall::chat`].
    pub async fn chat_with(
        &self,
        request: ChatRequest,
        cancel: CancelToken,
    ) -> Result<ChatResponse> {
        let request_id = request.id;
        if self.specs.is_empty() {
            return Err(
                RelayError::config("race requires at least one spec").with_request_id(request_id)
            );
        }

        // All siblings share one child scope: caller cancellation reaches
        // them through the parent chain, and the winner cancels the scope.
        let scope = cancel.child();
        let mut set: JoinSet<(usize, Result<ChatResponse>)> = JoinSet::new();
        for (index, spec) in self.specs.iter().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let scope = scope.clone();
            let mut sibling = request.clone();
            sibling.provider = Some(spec.provider.clone());
            sibling.model = spec.model.clone();
            set.spawn(async move { (index, orchestrator.chat_with(sibling, scope).await) });
        }

        let mut causes: Vec<Option<RelayError>> = (0..self.specs.len()).map(|_| None).collect();
        loop {
            let step = tokio::select! {
                kind = cancel.cancelled() => Step::Canceled(kind),
                joined = set.join_next() => Step::Joined(joined),
            };
            match step {
                Step::Canceled(kind) => {
                    // Siblings observe the caller's cancellation through the
                    // scope's ancestor chain; drain them off the call path.
                    tokio::spawn(drain(set));
                    return Err(RelayError::from_cancel(kind).with_request_id(request_id));
                }
                Step::Joined(None) => break,
                Step::Joined(Some(Ok((_, Ok(response))))) => {
                    scope.cancel(CancelKind::Superseded);
                    tokio::spawn(drain(set));
                    return Ok(response);
                }
                Step::Joined(Some(Ok((index, Err(error))))) => {
                    causes[index] = Some(error);
                }
                Step::Joined(Some(Err(join_error))) => {
                    debug!(error = %join_error, "race sibling terminated abnormally");
                }
            }
        }

        let causes: Vec<RelayError> = causes
            .into_iter()
            .map(|cause| {
                cause.unwrap_or_else(|| {
                    RelayError::config("race sibling terminated abnormally")
                })
            })
            .collect();
        Err(RelayError::all_failed(causes).with_request_id(request_id))
    }
}

/// Await straggling siblings so their errors stay observable at debug level
/// only, never by the caller.
async fn drain(mut set: JoinSet<(usize, Result<ChatResponse>)>) {
    while let Some(result) = set.join_next().await {
        if let Ok((index, Err(error))) = result {
            debug!(index, error = %error, "race sibling failed after settling");
        }
    }
}
