//! Validated domain types shared across the workspace.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single orchestrated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh request identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Composite `provider:model` key addressing limiter buckets and breaker
/// state for one binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingKey(String);

impl BindingKey {
    /// Build the key for a `(provider, model)` pair.
    #[must_use]
    pub fn new(provider: &str, model: &str) -> Self {
        Self(format!("{provider}:{model}"))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BindingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BindingKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Per-1K-token pricing for one model binding, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    /// Cost per 1K input tokens.
    pub input_per_1k: f64,
    /// Cost per 1K output tokens.
    pub output_per_1k: f64,
}

impl PriceTable {
    /// Create a price table.
    #[must_use]
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Combined rate used to rank bindings under the cheapest policy.
    #[must_use]
    pub fn blended(&self) -> f64 {
        self.input_per_1k + self.output_per_1k
    }

    /// Cost in USD for the given token counts.
    #[must_use]
    pub fn cost_for(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input = f64::from(input_tokens) / 1000.0 * self.input_per_1k;
        let output = f64::from(output_tokens) / 1000.0 * self.output_per_1k;
        input + output
    }
}

/// A concrete `(provider, model)` pair addressable for admission, breaker
/// state, and pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Provider key, unique within a registry.
    pub provider: String,
    /// Concrete model name as the provider knows it.
    pub model: String,
    /// Pricing, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceTable>,
}

impl Binding {
    /// Create a binding without pricing.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            price: None,
        }
    }

    /// Attach pricing.
    #[must_use]
    pub fn with_price(mut self, price: PriceTable) -> Self {
        self.price = Some(price);
        self
    }

    /// Composite key for limiter and breaker state.
    #[must_use]
    pub fn key(&self) -> BindingKey {
        BindingKey::new(&self.provider, &self.model)
    }
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Sampling temperature in `[0.0, 2.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// Validate and wrap a temperature.
    ///
    /// # Errors
    /// Returns a client error when the value is outside `[0.0, 2.0]`.
    pub fn new(value: f32) -> Result<Self, RelayError> {
        if (0.0..=2.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RelayError::client(format!(
                "temperature must be between 0.0 and 2.0, got {value}"
            )))
        }
    }

    /// The inner value.
    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

/// Nucleus sampling parameter in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopP(f32);

impl TopP {
    /// Validate and wrap a top-p value.
    ///
    /// # Errors
    /// Returns a client error when the value is outside `[0.0, 1.0]`.
    pub fn new(value: f32) -> Result<Self, RelayError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RelayError::client(format!(
                "top_p must be between 0.0 and 1.0, got {value}"
            )))
        }
    }

    /// The inner value.
    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

/// Positive generation token limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxTokens(u32);

impl MaxTokens {
    /// Validate and wrap a token limit.
    ///
    /// # Errors
    /// Returns a client error when the value is zero.
    pub fn new(value: u32) -> Result<Self, RelayError> {
        if value == 0 {
            Err(RelayError::client("max_tokens must be positive"))
        } else {
            Ok(Self(value))
        }
    }

    /// The inner value.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_key_format() {
        let binding = Binding::new("openai", "gpt-4o-mini");
        assert_eq!(binding.key().as_str(), "openai:gpt-4o-mini");
        assert_eq!(binding.to_string(), "openai:gpt-4o-mini");
    }

    #[test]
    fn test_price_table_cost() {
        let price = PriceTable::new(0.01, 0.03);
        let cost = price.cost_for(1000, 2000);
        assert!((cost - 0.07).abs() < 1e-9);
        assert!((price.blended() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(Temperature::new(0.0).is_ok());
        assert!(Temperature::new(2.0).is_ok());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(-0.1).is_err());
    }

    #[test]
    fn test_top_p_bounds() {
        assert!(TopP::new(0.9).is_ok());
        assert!(TopP::new(1.1).is_err());
    }

    #[test]
    fn test_max_tokens_positive() {
        assert!(MaxTokens::new(1).is_ok());
        assert!(MaxTokens::new(0).is_err());
    }

    #[test]
    fn test_request_ids_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }
}
