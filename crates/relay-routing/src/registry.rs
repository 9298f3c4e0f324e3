//! Provider registry and logical-name resolution.
//!
//! The registry owns the shared provider objects and an inverse index from
//! every concrete model name and alias to the ordered list of bindings that
//! serve it. Resolution applies the configured selection policy; direct
//! `(provider, model)` addressing bypasses the index entirely.

use crate::selector::{SelectionPolicy, Selector};
use relay_core::{Binding, ChatProvider, PriceTable, RelayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One model a provider serves, with optional aliases and pricing.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    /// Concrete model name as the provider knows it.
    pub name: String,
    /// Additional logical names resolving to this model.
    pub aliases: Vec<String>,
    /// Cost per 1K input tokens, USD.
    pub input_per_1k: Option<f64>,
    /// Cost per 1K output tokens, USD.
    pub output_per_1k: Option<f64>,
}

impl ModelEntry {
    /// Entry with no aliases and no pricing.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            input_per_1k: None,
            output_per_1k: None,
        }
    }

    /// Add an alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Set per-1K pricing.
    #[must_use]
    pub fn pricing(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_per_1k = Some(input_per_1k);
        self.output_per_1k = Some(output_per_1k);
        self
    }
}

/// A provider and the models it serves.
pub struct ProviderEntry {
    /// Provider key, unique within the registry.
    pub key: String,
    /// The shared provider object.
    pub provider: Arc<dyn ChatProvider>,
    /// Models served by this provider.
    pub models: Vec<ModelEntry>,
}

impl ProviderEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        provider: Arc<dyn ChatProvider>,
        models: Vec<ModelEntry>,
    ) -> Self {
        Self {
            key: key.into(),
            provider,
            models,
        }
    }
}

/// Mapping from logical model names to ordered binding lists.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    index: HashMap<String, Vec<Binding>>,
    selector: Selector,
}

impl ProviderRegistry {
    /// Create an empty registry with the given selection policy.
    #[must_use]
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            providers: HashMap::new(),
            index: HashMap::new(),
            selector: Selector::new(policy),
        }
    }

    /// The configured selection policy.
    #[must_use]
    pub fn policy(&self) -> SelectionPolicy {
        self.selector.policy()
    }

    /// Register a provider and index its models.
    ///
    /// For every model name and every alias, a binding is appended to that
    /// logical name's list; list order is registration order.
    ///
    /// # Errors
    /// Returns a config error when the provider key is already registered.
    pub fn add(&mut self, entry: ProviderEntry) -> Result<()> {
        if self.providers.contains_key(&entry.key) {
            return Err(RelayError::config(format!(
                "provider {} already registered",
                entry.key
            )));
        }

        for model in &entry.models {
            let price = match (model.input_per_1k, model.output_per_1k) {
                (None, None) => entry.provider.price().copied(),
                (input, output) => Some(PriceTable::new(
                    input.unwrap_or(0.0),
                    output.unwrap_or(0.0),
                )),
            };
            let binding = Binding {
                provider: entry.key.clone(),
                model: model.name.clone(),
                price,
            };

            self.index
                .entry(model.name.clone())
                .or_default()
                .push(binding.clone());
            for alias in &model.aliases {
                self.index
                    .entry(alias.clone())
                    .or_default()
                    .push(binding.clone());
            }
        }

        debug!(provider = %entry.key, models = entry.models.len(), "provider registered");
        self.providers.insert(entry.key, entry.provider);
        Ok(())
    }

    /// Resolve a logical name to one binding under the configured policy.
    ///
    /// # Errors
    /// Returns a config error when the name is unknown.
    pub fn resolve(&self, logical: &str) -> Result<Binding> {
        let bindings = self
            .index
            .get(logical)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| RelayError::config(format!("unknown model {logical}")))?;
        Ok(self
            .selector
            .select(logical, bindings)
            .cloned()
            .unwrap_or_else(|| bindings[0].clone()))
    }

    /// All bindings registered under a logical name, in registration order.
    #[must_use]
    pub fn bindings(&self, logical: &str) -> &[Binding] {
        self.index.get(logical).map_or(&[], Vec::as_slice)
    }

    /// Look up a registered provider.
    ///
    /// # Errors
    /// Returns a config error when the key is unknown.
    pub fn provider(&self, key: &str) -> Result<Arc<dyn ChatProvider>> {
        self.providers
            .get(key)
            .map(Arc::clone)
            .ok_or_else(|| RelayError::config(format!("unknown provider {key}")))
    }

    /// Construct the binding for direct `(provider, model)` addressing.
    ///
    /// Pricing comes from the index when the model is registered under the
    /// same provider, falling back to the provider's own price table.
    ///
    /// # Errors
    /// Returns a config error when the provider key is unknown.
    pub fn binding_for(&self, provider_key: &str, model: &str) -> Result<Binding> {
        let provider = self.provider(provider_key)?;
        if let Some(registered) = self
            .index
            .get(model)
            .and_then(|list| list.iter().find(|b| b.provider == provider_key))
        {
            return Ok(registered.clone());
        }
        let mut binding = Binding::new(provider_key, model);
        binding.price = provider.price().copied();
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{CallOptions, ChatRequest, ChatResponse};

    struct Stub(&'static str);

    #[async_trait]
    impl ChatProvider for Stub {
        fn id(&self) -> &str {
            self.0
        }

        async fn chat(
            &self,
            request: &ChatRequest,
            _options: &CallOptions,
        ) -> Result<ChatResponse> {
            Ok(ChatResponse::new("stub", self.0, &request.model))
        }
    }

    fn registry(policy: SelectionPolicy) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new(policy);
        registry
            .add(ProviderEntry::new(
                "a",
                Arc::new(Stub("a")),
                vec![ModelEntry::new("model-a").alias("fast").pricing(0.03, 0.0)],
            ))
            .unwrap();
        registry
            .add(ProviderEntry::new(
                "b",
                Arc::new(Stub("b")),
                vec![ModelEntry::new("model-b").alias("fast").pricing(0.001, 0.0)],
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_cheapest_resolves_to_cheaper_alias_binding() {
        let registry = registry(SelectionPolicy::Cheapest);
        let binding = registry.resolve("fast").unwrap();
        assert_eq!(binding.provider, "b");
        assert_eq!(binding.model, "model-b");
    }

    #[test]
    fn test_first_resolves_in_registration_order() {
        let registry = registry(SelectionPolicy::First);
        assert_eq!(registry.resolve("fast").unwrap().provider, "a");
    }

    #[test]
    fn test_alias_round_trip() {
        let registry = registry(SelectionPolicy::RoundRobin);
        let resolved = registry.resolve("fast").unwrap();
        let registered: Vec<_> = registry
            .bindings("fast")
            .iter()
            .map(|b| b.model.clone())
            .collect();
        assert!(registered.contains(&resolved.model));
    }

    #[test]
    fn test_unknown_logical_name_is_config_error() {
        let registry = registry(SelectionPolicy::First);
        let err = registry.resolve("nope").unwrap_err();
        assert_eq!(err.kind, relay_core::ErrorKind::Config);
    }

    #[test]
    fn test_duplicate_provider_key_rejected() {
        let mut registry = registry(SelectionPolicy::First);
        let err = registry
            .add(ProviderEntry::new("a", Arc::new(Stub("a")), vec![]))
            .unwrap_err();
        assert_eq!(err.kind, relay_core::ErrorKind::Config);
    }

    #[test]
    fn test_direct_addressing_uses_registered_pricing() {
        let registry = registry(SelectionPolicy::First);
        let binding = registry.binding_for("b", "model-b").unwrap();
        assert!(binding.price.is_some());

        // Unregistered model under a known provider still yields a binding.
        let ad_hoc = registry.binding_for("b", "model-x").unwrap();
        assert_eq!(ad_hoc.model, "model-x");

        let err = registry.binding_for("nope", "model-b").unwrap_err();
        assert_eq!(err.kind, relay_core::ErrorKind::Config);
    }
}
