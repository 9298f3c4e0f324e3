//! Streaming calls through the reliability stack.
//!
//! Selection and admission mirror the unary path. Retry is permitted only
//! until the first delta has been yielded: once bytes have flowed, errors
//! surface to the caller unmodified. Cancellation terminates the underlying
//! provider stream promptly.

use crate::orchestrator::Orchestrator;
use futures::StreamExt;
use relay_core::events::EventRecord;
use relay_core::{
    BindingKey, CallOptions, CancelKind, CancelToken, ChatDelta, ChatProvider, ChatRequest,
    ChatStream, DeltaStream, ErrorKind, RelayError, RequestId, Result,
};
use relay_resilience::CircuitBreaker;
use std::sync::Arc;
use tracing::debug;

/// One observation made while forwarding a provider stream.
enum Frame {
    Canceled(CancelKind),
    Item(Option<Result<ChatDelta>>),
}

impl Orchestrator {
    /// Open a streaming chat call.
    ///
    /// # Errors
    /// Resolution failures return immediately; admission and provider errors
    /// surface through the returned stream.
    pub async fn stream(self: &Arc<Self>, request: ChatRequest) -> Result<ChatStream> {
        self.stream_with(request, CancelToken::new()).await
    }

    /// Open a streaming chat call under the caller's cancellation scope.
    ///
    /// # Errors
    /// See [`Orchestrator::stream`].
    pub async fn stream_with(
        self: &Arc<Self>,
        request: ChatRequest,
        cancel: CancelToken,
    ) -> Result<ChatStream> {
        let request_id = request.id;
        request
            .validate()
            .map_err(|e| e.with_request_id(request_id))?;
        let (binding, provider) = self
            .resolve(&request)
            .map_err(|e| e.with_request_id(request_id))?;
        let key = binding.key();
        self.events.emit(EventRecord::CallStart {
            binding: key.clone(),
            request_id,
        });

        let orchestrator = Arc::clone(self);
        let stream = async_stream::stream! {
            let breaker = orchestrator.breakers.breaker_for(&key);
            let mut attempt: u32 = 1;

            'attempts: loop {
                if let Some(kind) = cancel.cause() {
                    let error = RelayError::from_cancel(kind)
                        .with_binding(key.clone())
                        .with_request_id(request_id)
                        .with_attempts(attempt.saturating_sub(1));
                    orchestrator.emit_stream_error(&key, request_id, &error);
                    yield Err(error);
                    return;
                }

                let opened = orchestrator
                    .open_stream_attempt(&breaker, &key, &provider, &request, &cancel)
                    .await;
                let (mut inner, attempt_cancel) = match opened {
                    Ok(opened) => opened,
                    Err(error) => {
                        let error = error
                            .with_binding(key.clone())
                            .with_request_id(request_id);
                        if orchestrator.retry.should_retry(&error, attempt) {
                            match orchestrator
                                .stream_backoff(&key, request_id, attempt, &error, &cancel)
                                .await
                            {
                                Ok(()) => {
                                    attempt += 1;
                                    continue 'attempts;
                                }
                                Err(canceled) => {
                                    let canceled = canceled.with_attempts(attempt);
                                    orchestrator.emit_stream_error(&key, request_id, &canceled);
                                    yield Err(canceled);
                                    return;
                                }
                            }
                        }
                        let error = error.with_attempts(attempt);
                        orchestrator.emit_stream_error(&key, request_id, &error);
                        yield Err(error);
                        return;
                    }
                };

                let mut yielded = false;
                loop {
                    let frame = tokio::select! {
                        biased;
                        item = inner.next() => Frame::Item(item),
                        kind = attempt_cancel.cancelled() => Frame::Canceled(kind),
                    };
                    // A producer that stops cooperatively after observing the
                    // token ends its stream; that is a cancellation, not a
                    // normal completion.
                    let frame = match frame {
                        Frame::Item(None) => match attempt_cancel.cause() {
                            Some(kind) => Frame::Canceled(kind),
                            None => Frame::Item(None),
                        },
                        other => other,
                    };
                    match frame {
                        Frame::Canceled(kind) => {
                            let error = RelayError::from_cancel(kind)
                                .with_binding(key.clone())
                                .with_request_id(request_id)
                                .with_attempts(attempt);
                            if error.kind.counts_against_breaker() {
                                breaker.record_failure();
                            } else {
                                breaker.record_neutral();
                            }
                            orchestrator.emit_stream_error(&key, request_id, &error);
                            yield Err(error);
                            return;
                        }
                        Frame::Item(None) => {
                            breaker.record_success();
                            orchestrator.events.emit(EventRecord::CallSuccess {
                                binding: key.clone(),
                                request_id,
                                attempts: attempt,
                                cost_usd: None,
                            });
                            return;
                        }
                        Frame::Item(Some(Ok(delta))) => {
                            yielded = true;
                            yield Ok(delta);
                        }
                        Frame::Item(Some(Err(error))) => {
                            let error = error
                                .with_binding(key.clone())
                                .with_request_id(request_id);
                            if error.kind.counts_against_breaker() {
                                breaker.record_failure();
                            } else {
                                breaker.record_neutral();
                            }
                            // Retry is allowed only before the first delta.
                            if !yielded && orchestrator.retry.should_retry(&error, attempt) {
                                debug!(
                                    binding = %key,
                                    attempt,
                                    error = %error,
                                    "restarting stream before first delta"
                                );
                                match orchestrator
                                    .stream_backoff(&key, request_id, attempt, &error, &cancel)
                                    .await
                                {
                                    Ok(()) => {
                                        attempt += 1;
                                        continue 'attempts;
                                    }
                                    Err(canceled) => {
                                        let canceled = canceled.with_attempts(attempt);
                                        orchestrator
                                            .emit_stream_error(&key, request_id, &canceled);
                                        yield Err(canceled);
                                        return;
                                    }
                                }
                            }
                            let error = error.with_attempts(attempt);
                            orchestrator.emit_stream_error(&key, request_id, &error);
                            yield Err(error);
                            return;
                        }
                    }
                }
            }
        };
        Ok(ChatStream::new(Box::pin(stream)))
    }

    /// One admission + stream-open attempt.
    ///
    /// Admitted attempts that fail record against the breaker exactly once,
    /// releasing any half-open probe slot; a breaker rejection holds no slot
    /// and records nothing.
    async fn open_stream_attempt(
        &self,
        breaker: &CircuitBreaker,
        key: &BindingKey,
        provider: &Arc<dyn ChatProvider>,
        request: &ChatRequest,
        cancel: &CancelToken,
    ) -> Result<(DeltaStream, CancelToken)> {
        let request_id = request.id;
        breaker.check().map_err(|e| e.with_request_id(request_id))?;

        let result: Result<(DeltaStream, CancelToken)> = async {
            self.limiter.acquire(key, request_id, cancel).await?;

            let attempt_cancel = match self.timeout {
                Some(deadline) => cancel.child_with_timeout(deadline),
                None => cancel.child(),
            };
            let options = CallOptions {
                cancel: attempt_cancel.clone(),
                request_id,
            };
            tokio::select! {
                biased;
                result = provider.stream(request, &options) => {
                    result.map(|inner| (inner, attempt_cancel))
                }
                kind = attempt_cancel.cancelled() => Err(RelayError::from_cancel(kind)),
            }
        }
        .await;

        if let Err(error) = &result {
            if error.kind.counts_against_breaker() {
                breaker.record_failure();
            } else if error.kind != ErrorKind::BreakerOpen {
                breaker.record_neutral();
            }
        }
        result
    }

    /// Emit the retry event and sleep the backoff, watching for
    /// cancellation.
    ///
    /// # Errors
    /// Returns the classified cancellation error when the sleep is cut
    /// short.
    async fn stream_backoff(
        &self,
        key: &BindingKey,
        request_id: RequestId,
        attempt: u32,
        error: &RelayError,
        cancel: &CancelToken,
    ) -> Result<()> {
        let delay = self.retry.backoff_delay(attempt, error);
        self.events.emit(EventRecord::CallRetry {
            binding: key.clone(),
            request_id,
            attempt,
            wait_ms: delay.as_millis() as u64,
            error: error.kind,
        });
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            kind = cancel.cancelled() => {
                Err(RelayError::from_cancel(kind)
                    .with_binding(key.clone())
                    .with_request_id(request_id))
            }
        }
    }

    fn emit_stream_error(&self, key: &BindingKey, request_id: RequestId, error: &RelayError) {
        self.events.emit(EventRecord::CallError {
            binding: key.clone(),
            request_id,
            attempts: error.attempts,
            error: error.kind,
        });
    }
}
