//! Orchestrator core.
//!
//! Composes selection, middleware, and the reliability stack
//! (breaker → limiter → deadline → provider) around every call, accumulating
//! cost and emitting structured events.

use crate::config::OrchestratorConfig;
use crate::middleware::{Middleware, MiddlewareContext};
use relay_core::events::{EventBus, EventRecord};
use relay_core::{
    Binding, BindingKey, CallOptions, CancelToken, ChatProvider, ChatRequest, ChatResponse,
    RelayError, Result,
};
use relay_resilience::{
    BucketStats, CircuitBreakerRegistry, CircuitBreakerStats, RateLimiter, RetryContext,
    RetryPolicy,
};
use relay_routing::ProviderRegistry;
use relay_telemetry::{CostReport, CostTracker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A `(provider, model)` pair addressed by the fallback and race composers,
/// bypassing logical-name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    /// Provider key.
    pub provider: String,
    /// Concrete model name.
    pub model: String,
}

impl CallSpec {
    /// Create a spec.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for CallSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Multi-provider request orchestrator.
///
/// Each instance owns its registry, limiter buckets, breakers, cost counter,
/// and event bus; instances never share state. The orchestrator is safe for
/// concurrent calls from many tasks.
pub struct Orchestrator {
    pub(crate) registry: Option<ProviderRegistry>,
    pub(crate) providers: HashMap<String, Arc<dyn ChatProvider>>,
    pub(crate) limiter: RateLimiter,
    pub(crate) breakers: CircuitBreakerRegistry,
    pub(crate) retry: RetryPolicy,
    pub(crate) timeout: Option<Duration>,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) events: EventBus,
    pub(crate) cost: CostTracker,
}

impl Orchestrator {
    /// Build an orchestrator from its configuration.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        let events = EventBus::new(config.observers);
        Self {
            registry: config.registry,
            providers: config.providers,
            limiter: RateLimiter::new(config.limits, events.clone()),
            breakers: CircuitBreakerRegistry::new(config.breaker, events.clone()),
            retry: RetryPolicy::new(config.retry),
            timeout: config.timeout,
            middleware: config.middleware,
            events,
            cost: CostTracker::new(),
        }
    }

    /// Cumulative USD spent across all successful calls. Monotonically
    /// non-decreasing.
    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.cost.total_usd()
    }

    /// Point-in-time cost summary.
    #[must_use]
    pub fn cost_report(&self) -> CostReport {
        self.cost.report()
    }

    /// Events dropped because an observer could not keep up.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events.events_dropped()
    }

    /// Stats for the breaker guarding `key`, once that binding has been
    /// called.
    #[must_use]
    pub fn breaker_stats(&self, key: &BindingKey) -> Option<CircuitBreakerStats> {
        self.breakers.stats().get(key).copied()
    }

    /// Stats for the limiter bucket of `key`, if one is configured.
    #[must_use]
    pub fn limiter_stats(&self, key: &BindingKey) -> Option<BucketStats> {
        self.limiter.stats(key)
    }

    /// Execute one unary chat call.
    ///
    /// # Errors
    /// Returns a classified error carrying the binding, request id, and
    /// attempt count.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_with(request, CancelToken::new()).await
    }

    /// Execute one unary chat call under the caller's cancellation scope.
    ///
    /// # Errors
    /// See [`Orchestrator::chat`].
    pub async fn chat_with(
        &self,
        request: ChatRequest,
        cancel: CancelToken,
    ) -> Result<ChatResponse> {
        let request_id = request.id;
        request
            .validate()
            .map_err(|e| e.with_request_id(request_id))?;
        let (binding, provider) = self
            .resolve(&request)
            .map_err(|e| e.with_request_id(request_id))?;
        self.dispatch(binding, provider, request, cancel).await
    }

    /// Resolve a request to a binding and its provider.
    pub(crate) fn resolve(
        &self,
        request: &ChatRequest,
    ) -> Result<(Binding, Arc<dyn ChatProvider>)> {
        if let Some(provider_key) = &request.provider {
            // Direct addressing bypasses the registry index.
            if let Some(registry) = &self.registry {
                let binding = registry.binding_for(provider_key, &request.model)?;
                let provider = registry.provider(provider_key)?;
                return Ok((binding, provider));
            }
            let provider = self.providers.get(provider_key).cloned().ok_or_else(|| {
                RelayError::config(format!("unknown provider {provider_key}"))
            })?;
            let mut binding = Binding::new(provider_key.clone(), request.model.clone());
            binding.price = provider.price().copied();
            return Ok((binding, provider));
        }

        let registry = self.registry.as_ref().ok_or_else(|| {
            RelayError::config(
                "no registry configured; direct provider addressing is required",
            )
        })?;
        let binding = registry.resolve(&request.model)?;
        let provider = registry.provider(&binding.provider)?;
        Ok((binding, provider))
    }

    /// Run the middleware onion whose innermost step is the reliability
    /// stack.
    pub(crate) async fn dispatch(
        &self,
        binding: Binding,
        provider: Arc<dyn ChatProvider>,
        request: ChatRequest,
        cancel: CancelToken,
    ) -> Result<ChatResponse> {
        let key = binding.key();
        let request_id = request.id;
        self.events.emit(EventRecord::CallStart {
            binding: key.clone(),
            request_id,
        });

        let attempts = AtomicU32::new(0);
        let mut cx = MiddlewareContext::new(binding.clone(), request);

        // Descend: hooks in registration order.
        let mut ran = 0usize;
        for hook in &self.middleware {
            match hook.before(&mut cx).await {
                Ok(None) => ran += 1,
                Ok(Some(response)) => {
                    cx.response = Some(response);
                    break;
                }
                Err(error) => {
                    cx.error =
                        Some(error.with_binding(key.clone()).with_request_id(request_id));
                    break;
                }
            }
        }

        // Innermost step, unless a hook short-circuited or aborted.
        if cx.response.is_none() && cx.error.is_none() {
            let outcome = self
                .run_attempts(&binding, &provider, &cx.request, &cancel, &attempts)
                .await;
            match outcome {
                Ok(response) => cx.response = Some(response),
                Err(error) => cx.error = Some(error),
            }
        }
        cx.finished_at = Some(Instant::now());

        // Ascend: only hooks that ran, in reverse order.
        for hook in self.middleware[..ran].iter().rev() {
            if let Err(error) = hook.after(&mut cx).await {
                cx.response = None;
                cx.error = Some(error.with_binding(key.clone()).with_request_id(request_id));
            }
        }

        let attempts = attempts.load(Ordering::Relaxed);
        match (cx.response, cx.error) {
            (Some(response), _) => {
                let response = self.settle_success(&binding, response);
                self.events.emit(EventRecord::CallSuccess {
                    binding: key,
                    request_id,
                    attempts,
                    cost_usd: response.cost_usd,
                });
                Ok(response)
            }
            (None, Some(error)) => {
                self.events.emit(EventRecord::CallError {
                    binding: key,
                    request_id,
                    attempts,
                    error: error.kind,
                });
                Err(error)
            }
            (None, None) => {
                // A hook consumed the outcome without producing one.
                let error = RelayError::config("middleware chain produced no outcome")
                    .with_binding(key.clone())
                    .with_request_id(request_id);
                self.events.emit(EventRecord::CallError {
                    binding: key,
                    request_id,
                    attempts,
                    error: error.kind,
                });
                Err(error)
            }
        }
    }

    /// Stamp the serving binding and settle cost accounting.
    fn settle_success(&self, binding: &Binding, mut response: ChatResponse) -> ChatResponse {
        response.provider.clone_from(&binding.provider);
        response.model.clone_from(&binding.model);

        if response.cost_usd.is_none() {
            if let (Some(price), Some(usage)) = (binding.price, response.usage) {
                response.cost_usd =
                    Some(price.cost_for(usage.input.unwrap_or(0), usage.output.unwrap_or(0)));
            }
        }
        if let Some(cost) = response.cost_usd {
            self.cost.record(&binding.key(), cost);
        }
        response
    }

    /// Per-attempt reliability stack driven by the retry executor:
    /// breaker check → limiter admission → deadline scope → provider call →
    /// classification → breaker record.
    async fn run_attempts(
        &self,
        binding: &Binding,
        provider: &Arc<dyn ChatProvider>,
        request: &ChatRequest,
        cancel: &CancelToken,
        attempts: &AtomicU32,
    ) -> Result<ChatResponse> {
        let key = binding.key();
        let request_id = request.id;
        let breaker = self.breakers.breaker_for(&key);
        let limiter = &self.limiter;
        let timeout = self.timeout;

        let retry_cx = RetryContext {
            binding: key.clone(),
            request_id,
            cancel: cancel.clone(),
            events: self.events.clone(),
        };

        self.retry
            .execute(&retry_cx, move || {
                let breaker = Arc::clone(&breaker);
                let provider = Arc::clone(provider);
                let key = key.clone();
                let cancel = cancel.clone();
                async move {
                    attempts.fetch_add(1, Ordering::Relaxed);

                    // A rejection here holds no probe slot, so nothing to record.
                    breaker.check().map_err(|e| e.with_request_id(request_id))?;

                    let result: Result<ChatResponse> = async {
                        limiter.acquire(&key, request_id, &cancel).await?;

                        let attempt_cancel = match timeout {
                            Some(deadline) => cancel.child_with_timeout(deadline),
                            None => cancel.child(),
                        };
                        let options = CallOptions {
                            cancel: attempt_cancel.clone(),
                            request_id,
                        };

                        // Poll the provider first so a cooperating provider
                        // observes the cancellation itself before the scope
                        // tears its future down.
                        tokio::select! {
                            biased;
                            result = provider.chat(request, &options) => result,
                            kind = attempt_cancel.cancelled() => Err(RelayError::from_cancel(kind)),
                        }
                    }
                    .await;

                    // Every admitted attempt records exactly once, releasing
                    // any half-open probe slot it held.
                    match &result {
                        Ok(_) => breaker.record_success(),
                        Err(error) if error.kind.counts_against_breaker() => {
                            breaker.record_failure();
                        }
                        Err(_) => breaker.record_neutral(),
                    }

                    result.map_err(|e| {
                        e.with_binding(key.clone()).with_request_id(request_id)
                    })
                }
            })
            .await
    }
}
