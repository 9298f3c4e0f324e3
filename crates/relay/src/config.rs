//! Orchestrator configuration surface.

use crate::middleware::Middleware;
use relay_core::events::EventObserver;
use relay_core::{BindingKey, ChatProvider};
use relay_resilience::{CircuitBreakerConfig, RateLimitRule, RetryConfig};
use relay_routing::ProviderRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for an [`crate::Orchestrator`].
///
/// Either a prebuilt [`ProviderRegistry`] enables logical-name resolution,
/// or a bare provider map restricts callers to direct `(provider, model)`
/// addressing. Secrets never pass through here; providers arrive already
/// constructed.
#[derive(Default)]
pub struct OrchestratorConfig {
    /// Registry for logical-name resolution, if any.
    pub registry: Option<ProviderRegistry>,
    /// Providers addressable directly when no registry is configured.
    pub providers: HashMap<String, Arc<dyn ChatProvider>>,
    /// Admission rules per binding key.
    pub limits: HashMap<BindingKey, RateLimitRule>,
    /// Retry policy for every call.
    pub retry: RetryConfig,
    /// Breaker configuration shared by every binding.
    pub breaker: CircuitBreakerConfig,
    /// Per-attempt deadline; `None` disables the internal timeout.
    pub timeout: Option<Duration>,
    /// Ordered middleware hooks.
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Event sinks, fixed for the lifetime of the orchestrator.
    pub observers: Vec<EventObserver>,
}

impl OrchestratorConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Use a prebuilt registry for logical-name resolution.
    #[must_use]
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.config.registry = Some(registry);
        self
    }

    /// Register a directly-addressable provider.
    #[must_use]
    pub fn provider(mut self, key: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        self.config.providers.insert(key.into(), provider);
        self
    }

    /// Set the admission rule for one binding.
    #[must_use]
    pub fn limit(mut self, key: impl Into<BindingKey>, rule: RateLimitRule) -> Self {
        self.config.limits.insert(key.into(), rule);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the breaker configuration.
    #[must_use]
    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    /// Set the per-attempt deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Append a middleware hook; hooks run in the order they were added.
    #[must_use]
    pub fn middleware(mut self, hook: Arc<dyn Middleware>) -> Self {
        self.config.middleware.push(hook);
        self
    }

    /// Register an event observer.
    #[must_use]
    pub fn observer(mut self, observer: EventObserver) -> Self {
        self.config.observers.push(observer);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = OrchestratorConfig::builder().build();
        assert!(config.registry.is_none());
        assert!(config.providers.is_empty());
        assert!(config.timeout.is_none());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    fn test_builder_collects_limits() {
        let config = OrchestratorConfig::builder()
            .limit("x:m", RateLimitRule::new(2.0))
            .timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.limits.len(), 1);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }
}
