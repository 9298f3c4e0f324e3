//! The capability each provider implements.
//!
//! Providers are responsible only for vendor protocol translation. Retry,
//! rate limiting, and circuit breaking live in the orchestrator; a provider
//! must never duplicate them.

use crate::cancel::CancelToken;
use crate::error::{RelayError, Result};
use crate::request::ChatRequest;
use crate::response::ChatResponse;
use crate::streaming::DeltaStream;
use crate::types::{PriceTable, RequestId};
use async_trait::async_trait;

/// Per-call options handed to a provider.
///
/// The cancellation token is never already triggered when a call starts; a
/// cooperative provider checks it between I/O steps and between stream
/// frames.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Cancellation scope for this attempt.
    pub cancel: CancelToken,
    /// Identifier of the orchestrated call this attempt belongs to.
    pub request_id: RequestId,
}

impl CallOptions {
    /// Options with a fresh root token, mainly for tests and direct use.
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            cancel: CancelToken::new(),
            request_id,
        }
    }
}

/// Narrow interface every provider implements.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider key, unique within a registry.
    fn id(&self) -> &str;

    /// Execute one unary chat call.
    ///
    /// # Errors
    /// Returns a classified error; transport-level failures must be mapped
    /// through [`RelayError::from_status`] or the network/timeout
    /// constructors before they leave the provider.
    async fn chat(&self, request: &ChatRequest, options: &CallOptions) -> Result<ChatResponse>;

    /// Open a streaming chat call.
    ///
    /// # Errors
    /// The default implementation reports that streaming is unsupported.
    async fn stream(&self, request: &ChatRequest, options: &CallOptions) -> Result<DeltaStream> {
        let _ = (request, options);
        Err(RelayError::client(format!(
            "provider {} does not support streaming",
            self.id()
        )))
    }

    /// Pricing used for cost accounting when the provider does not report
    /// `cost_usd` itself.
    fn price(&self) -> Option<&PriceTable> {
        None
    }
}
