//! The uniform chat response returned by the orchestrator.

use serde::{Deserialize, Serialize};

/// Token counts reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<u32>,
    /// Completion tokens produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<u32>,
}

impl TokenUsage {
    /// Usage with both counts known.
    #[must_use]
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
        }
    }
}

/// Uniform chat response. Ownership transfers to the caller on return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Token usage, when the provider reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Cost in USD; computed from the binding's price table when the
    /// provider does not supply it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Provider key that served the call.
    pub provider: String,
    /// Concrete model that served the call.
    pub model: String,
    /// Opaque provider payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ChatResponse {
    /// A minimal response, used by providers that report nothing but text.
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            usage: None,
            cost_usd: None,
            provider: provider.into(),
            model: model.into(),
            raw: None,
        }
    }

    /// Attach token usage.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach a provider-reported cost.
    #[must_use]
    pub fn with_cost_usd(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_builders() {
        let response = ChatResponse::new("hi", "openai", "gpt-4o-mini")
            .with_usage(TokenUsage::new(10, 20))
            .with_cost_usd(0.001);
        assert_eq!(response.content, "hi");
        assert_eq!(response.usage.unwrap().output, Some(20));
        assert_eq!(response.cost_usd, Some(0.001));
    }
}
