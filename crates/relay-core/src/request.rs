//! The uniform chat request submitted to the orchestrator.

use crate::error::RelayError;
use crate::types::{MaxTokens, RequestId, Temperature, TopP};
use serde::{Deserialize, Serialize};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
    /// Tool result fed back to the model.
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
            Self::Tool => f.write_str("tool"),
        }
    }
}

/// A single conversation message. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    pub role: MessageRole,
    /// Text or serialized tool-call payload.
    pub content: String,
    /// Optional author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool call this message responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    /// Create a tool-result message.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Uniform chat request.
///
/// `model` is a logical name resolved through the registry unless `provider`
/// is set, in which case the `(provider, model)` binding is addressed
/// directly and the registry is bypassed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Unique request identifier.
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,
    /// Logical model name or alias, or a concrete model name under direct
    /// addressing.
    pub model: String,
    /// Provider key for direct addressing; `None` resolves through the
    /// registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Ordered conversation, at least one message.
    pub messages: Vec<Message>,
    /// Sampling temperature in `[0.0, 2.0]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Generation token limit, positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter in `[0.0, 1.0]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl ChatRequest {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ChatRequestBuilder {
        ChatRequestBuilder::default()
    }

    /// Validate the request against the data-model bounds.
    ///
    /// # Errors
    /// Returns a client error describing the first violated bound.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.model.is_empty() {
            return Err(RelayError::client("model must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(RelayError::client("messages must not be empty"));
        }
        if let Some(t) = self.temperature {
            Temperature::new(t)?;
        }
        if let Some(m) = self.max_tokens {
            MaxTokens::new(m)?;
        }
        if let Some(p) = self.top_p {
            TopP::new(p)?;
        }
        Ok(())
    }
}

/// Builder for [`ChatRequest`].
#[derive(Debug, Default)]
pub struct ChatRequestBuilder {
    model: Option<String>,
    provider: Option<String>,
    messages: Vec<Message>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
}

impl ChatRequestBuilder {
    /// Set the logical model name.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Address a provider directly, bypassing the registry.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Append a message.
    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replace the message list.
    #[must_use]
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the generation token limit.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the nucleus sampling parameter.
    #[must_use]
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Build and validate the request.
    ///
    /// # Errors
    /// Returns a client error when a required field is missing or a bound is
    /// violated.
    pub fn build(self) -> Result<ChatRequest, RelayError> {
        let request = ChatRequest {
            id: RequestId::generate(),
            model: self
                .model
                .ok_or_else(|| RelayError::client("model is required"))?,
            provider: self.provider,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        };
        request.validate()?;
        Ok(request)
    }
}
