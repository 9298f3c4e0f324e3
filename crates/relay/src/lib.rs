//! # Relay
//!
//! Core orchestrator of a multi-provider LLM request router.
//!
//! The orchestrator accepts a uniform chat request naming a logical model
//! (or a concrete `(provider, model)` binding), selects a binding through
//! the registry, and dispatches it through a reliability stack of
//! token-bucket admission, circuit breaking, retry with jittered backoff,
//! and per-attempt deadlines, all under explicit cancellation. Composite
//! patterns are built on the same primitives: ordered [`fallback`], a
//! first-success-wins [`race`], and a bounded-concurrency [`map`].
//!
//! [`fallback`]: Orchestrator::fallback
//! [`race`]: Orchestrator::race
//! [`map`]: Orchestrator::map
//!
//! ```no_run
//! use relay::{ChatRequest, Message, Orchestrator, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! # async fn example(registry: relay::ProviderRegistry) -> relay::Result<()> {
//! let orchestrator = Arc::new(Orchestrator::new(
//!     OrchestratorConfig::builder().registry(registry).build(),
//! ));
//!
//! let response = orchestrator
//!     .chat(
//!         ChatRequest::builder()
//!             .model("fast")
//!             .message(Message::user("hello"))
//!             .build()?,
//!     )
//!     .await?;
//! println!("{} (${:.5})", response.content, orchestrator.total_cost_usd());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod fallback;
pub mod map;
pub mod middleware;
pub mod orchestrator;
pub mod race;
mod stream;

// Re-export the consumer surface
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use fallback::FallbackCall;
pub use map::MapOptions;
pub use middleware::{Middleware, MiddlewareContext};
pub use orchestrator::{CallSpec, Orchestrator};
pub use race::RaceCall;

// Re-export the workspace foundation so consumers depend on one crate
pub use relay_core::{
    Binding, BindingKey, CallOptions, CancelKind, CancelToken, ChatDelta, ChatProvider,
    ChatRequest, ChatRequestBuilder, ChatResponse, ChatStream, DeltaStream, ErrorKind, EventBus,
    EventObserver, EventRecord, Message, MessageRole, PriceTable, RelayError, RequestId, Result,
    TokenUsage,
};
pub use relay_resilience::{
    BucketStats, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, JitterMode,
    RateLimitRule, RetryConfig,
};
pub use relay_routing::{ModelEntry, ProviderEntry, ProviderRegistry, SelectionPolicy};
pub use relay_telemetry::{init_logging, CostReport, LoggingConfig};
