//! Error types for the relay orchestrator.
//!
//! Every failure that crosses the orchestrator boundary is classified into a
//! closed set of kinds. The kind alone decides whether the retry executor may
//! try again and whether the circuit breaker counts the failure.

use crate::cancel::CancelKind;
use crate::types::{BindingKey, RequestId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Closed set of error classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request, unknown model, or a 4xx from the provider
    /// (excluding 408/429).
    Client,
    /// 401/403 from the provider.
    Auth,
    /// 429 or a provider-signaled quota; may carry a retry-after hint.
    RateLimited,
    /// 5xx from the provider.
    Server,
    /// DNS/TCP/TLS failure or connection reset.
    Network,
    /// Internal deadline exceeded.
    Timeout,
    /// Caller cancellation.
    Canceled,
    /// Short-circuited by an open circuit breaker.
    BreakerOpen,
    /// Unknown binding or invalid orchestrator state.
    Config,
    /// Race exhausted; carries the per-spec causes.
    AllFailed,
}

impl ErrorKind {
    /// Whether the retry executor may attempt the call again.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server | Self::Network | Self::Timeout
        )
    }

    /// Whether a failure of this kind counts toward opening the breaker.
    #[must_use]
    pub fn counts_against_breaker(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server | Self::Network | Self::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Client => "client_error",
            Self::Auth => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::Server => "server_error",
            Self::Network => "network_error",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::BreakerOpen => "breaker_open",
            Self::Config => "config_error",
            Self::AllFailed => "all_failed",
        };
        f.write_str(name)
    }
}

/// A classified orchestrator error.
///
/// Carries the classification plus the call metadata a consumer needs to act
/// on the failure. No stack traces cross this boundary.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RelayError {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Binding the call was addressed to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingKey>,
    /// Request identifier, when the error occurred inside a call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Number of attempts made before the error was surfaced.
    pub attempts: u32,
    /// Provider-signaled minimum wait before retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    /// Per-spec causes, populated only for `AllFailed`.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub causes: Vec<RelayError>,
}

impl RelayError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            binding: None,
            request_id: None,
            attempts: 0,
            retry_after: None,
            causes: Vec::new(),
        }
    }

    /// Create a client error.
    #[must_use]
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, message)
    }

    /// Create an authentication error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// Create a rate-limited error with an optional retry-after hint.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let mut err = Self::new(ErrorKind::RateLimited, message);
        err.retry_after = retry_after;
        err
    }

    /// Create a server error.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create a caller-cancellation error.
    #[must_use]
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "call canceled by caller")
    }

    /// Create a breaker-open rejection with the time until the next probe.
    #[must_use]
    pub fn breaker_open(binding: BindingKey, reopens_in: Duration) -> Self {
        let mut err = Self::new(
            ErrorKind::BreakerOpen,
            format!("circuit breaker open for {binding}"),
        );
        err.binding = Some(binding);
        err.retry_after = Some(reopens_in);
        err
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Create an all-failed error from per-spec causes in input order.
    #[must_use]
    pub fn all_failed(causes: Vec<RelayError>) -> Self {
        let mut err = Self::new(
            ErrorKind::AllFailed,
            format!("all {} candidates failed", causes.len()),
        );
        err.causes = causes;
        err
    }

    /// Classify a cancellation cause into the surfaced error kind.
    ///
    /// An internal deadline surfaces as `Timeout` and stays retryable; caller
    /// cancellation and race supersession surface as `Canceled`.
    #[must_use]
    pub fn from_cancel(kind: CancelKind) -> Self {
        match kind {
            CancelKind::Caller => Self::canceled(),
            CancelKind::Deadline => Self::timeout("attempt deadline exceeded"),
            CancelKind::Superseded => {
                Self::new(ErrorKind::Canceled, "call superseded by a sibling")
            }
        }
    }

    /// Classify an HTTP status from a provider.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::auth(message),
            408 => Self::timeout(message),
            429 => Self::rate_limited(message, None),
            400..=499 => Self::client(message),
            500..=599 => Self::server(message),
            _ => Self::network(message),
        }
    }

    /// Attach the binding the call was addressed to.
    #[must_use]
    pub fn with_binding(mut self, binding: BindingKey) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Attach the request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Stamp the number of attempts made.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Whether the retry executor may attempt the call again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
