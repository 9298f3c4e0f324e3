//! # Relay Core
//!
//! Core types, traits, and error handling for the relay orchestrator.
//!
//! This crate provides the foundation used throughout the workspace:
//! - Request, response, and streaming-frame types
//! - The [`ChatProvider`] capability providers implement
//! - The classified error taxonomy
//! - Hierarchical cancellation tokens
//! - Structured orchestration events and the non-blocking event bus

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod error;
pub mod events;
pub mod provider;
pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

// Re-export commonly used types
pub use cancel::{CancelKind, CancelToken};
pub use error::{ErrorKind, RelayError, Result};
pub use events::{EventBus, EventObserver, EventRecord};
pub use provider::{CallOptions, ChatProvider};
pub use request::{ChatRequest, ChatRequestBuilder, Message, MessageRole};
pub use response::{ChatResponse, TokenUsage};
pub use streaming::{ChatDelta, ChatStream, DeltaStream};
pub use types::{Binding, BindingKey, MaxTokens, PriceTable, RequestId, Temperature, TopP};
