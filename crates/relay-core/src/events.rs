//! Structured orchestration events.
//!
//! The orchestrator reports call lifecycle, retry, breaker, and limiter
//! activity as typed [`EventRecord`]s. Delivery is best-effort and never
//! blocks the call path: a slow observer's events are dropped and counted.

use crate::error::ErrorKind;
use crate::types::{BindingKey, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Default per-observer channel capacity.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 256;

/// A structured orchestration event.
///
/// Events for a single call are emitted in strict order:
/// `CallStart` → `CallRetry`* → (`CallSuccess` | `CallError`). Events across
/// calls may interleave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRecord {
    /// A call was admitted into the reliability stack.
    CallStart {
        /// Binding the call is addressed to.
        binding: BindingKey,
        /// Call identifier.
        request_id: RequestId,
    },
    /// A call completed successfully.
    CallSuccess {
        /// Binding that served the call.
        binding: BindingKey,
        /// Call identifier.
        request_id: RequestId,
        /// Attempts consumed, including the successful one.
        attempts: u32,
        /// Cost charged for the call, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
    },
    /// A call failed terminally.
    CallError {
        /// Binding the call was addressed to.
        binding: BindingKey,
        /// Call identifier.
        request_id: RequestId,
        /// Attempts consumed.
        attempts: u32,
        /// Classification of the surfaced error.
        error: ErrorKind,
    },
    /// An attempt failed and the executor is about to back off.
    CallRetry {
        /// Binding the call is addressed to.
        binding: BindingKey,
        /// Call identifier.
        request_id: RequestId,
        /// The attempt that just failed, 1-indexed.
        attempt: u32,
        /// Backoff about to be slept, in milliseconds.
        wait_ms: u64,
        /// Classification of the failed attempt.
        error: ErrorKind,
    },
    /// A breaker transitioned to open.
    BreakerOpen {
        /// Affected binding.
        binding: BindingKey,
    },
    /// A breaker transitioned back to closed.
    BreakerClose {
        /// Affected binding.
        binding: BindingKey,
    },
    /// A call is waiting for a limiter token.
    LimiterWait {
        /// Binding whose bucket is empty.
        binding: BindingKey,
        /// Call identifier.
        request_id: RequestId,
        /// Expected wait until a token is available, in milliseconds.
        wait_ms: u64,
    },
}

/// An event sink registered at orchestrator construction.
#[derive(Debug)]
pub struct EventObserver {
    tx: mpsc::Sender<EventRecord>,
}

impl EventObserver {
    /// Create an observer together with the receiving end of its channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Create an observer with the default channel capacity.
    #[must_use]
    pub fn with_default_capacity() -> (Self, mpsc::Receiver<EventRecord>) {
        Self::channel(DEFAULT_OBSERVER_CAPACITY)
    }
}

struct BusInner {
    observers: Vec<mpsc::Sender<EventRecord>>,
    dropped: AtomicU64,
}

/// Non-blocking fan-out of [`EventRecord`]s to fixed observers.
///
/// Cloning shares the same observer set and drop counter.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Build a bus over the given observers.
    #[must_use]
    pub fn new(observers: Vec<EventObserver>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                observers: observers.into_iter().map(|o| o.tx).collect(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// A bus with no observers; every emit is a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Deliver an event to every observer without blocking.
    ///
    /// Events an observer cannot keep up with are dropped and counted.
    pub fn emit(&self, event: EventRecord) {
        trace!(?event, "orchestration event");
        for observer in &self.inner.observers {
            if observer.try_send(event.clone()).is_err() {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Total events dropped because an observer was slow or gone.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.inner.observers.len())
            .field("dropped", &self.events_dropped())
            .finish()
    }
}
