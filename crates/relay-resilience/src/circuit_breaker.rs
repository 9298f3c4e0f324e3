//! Circuit breaker pattern implementation.
//!
//! The circuit breaker prevents cascading failures by failing fast against
//! an unhealthy binding and probing it again after a cool-down.

use parking_lot::{Mutex, RwLock};
use relay_core::events::{EventBus, EventRecord};
use relay_core::{BindingKey, RelayError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, probing if the binding recovered
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before probing the binding again
    pub open_duration: Duration,
    /// Concurrent probes admitted while half-open
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_probes: 1,
        }
    }
}

/// Circuit breaker for a single binding.
///
/// State transitions are atomic with respect to [`CircuitBreaker::check`] and
/// the `record_*` methods: no call is admitted after a transition to open.
pub struct CircuitBreaker {
    /// Binding this breaker guards
    binding: BindingKey,
    /// Configuration
    config: CircuitBreakerConfig,
    /// Monotonic reference point for `opened_at_ms`
    epoch: Instant,
    /// Current state (atomic for lock-free reads)
    state: AtomicU8,
    /// Consecutive counted failures while closed
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` when the circuit opened
    opened_at_ms: AtomicU64,
    /// Probes currently in flight while half-open
    half_open_in_flight: AtomicU32,
    /// Lock for state transitions
    transition_lock: Mutex<()>,
    /// Sink for open/close events
    events: EventBus,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(binding: BindingKey, config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            binding,
            config,
            epoch: Instant::now(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            half_open_in_flight: AtomicU32::new(0),
            transition_lock: Mutex::new(()),
            events,
        }
    }

    /// Get the binding this breaker guards
    #[must_use]
    pub fn binding(&self) -> &BindingKey {
        &self.binding
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether a call may pass.
    ///
    /// While open, the rejection carries the remaining cool-down as a
    /// retry-after hint so the retry executor can decide whether waiting for
    /// the next probe window is worthwhile.
    ///
    /// # Errors
    /// Returns a `BreakerOpen` error when the call must be short-circuited.
    pub fn check(&self) -> Result<()> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => self.try_acquire_probe(),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown();
                if remaining.is_zero() {
                    self.transition_to_half_open();
                    self.try_acquire_probe()
                } else {
                    Err(RelayError::breaker_open(self.binding.clone(), remaining))
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                // First probe success closes the circuit.
                self.release_probe();
                self.transition_to_closed();
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call that counts toward the breaker.
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    debug!(
                        binding = %self.binding,
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker failure threshold reached"
                    );
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => {
                debug!(binding = %self.binding, "circuit breaker half-open probe failed, reopening");
                self.release_probe();
                self.transition_to_open();
            }
            CircuitState::Open => {}
        }
    }

    /// Record a call whose outcome must not count either way
    /// (client errors, cancellation).
    pub fn record_neutral(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.release_probe();
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        self.transition_to_closed();
    }

    /// Force the circuit open (for testing or manual intervention)
    pub fn force_open(&self) {
        self.transition_to_open();
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            half_open_in_flight: self.half_open_in_flight.load(Ordering::Relaxed),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn remaining_cooldown(&self) -> Duration {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        let elapsed = self.now_ms().saturating_sub(opened_at);
        let open_ms = self.config.open_duration.as_millis() as u64;
        Duration::from_millis(open_ms.saturating_sub(elapsed))
    }

    fn try_acquire_probe(&self) -> Result<()> {
        let limit = self.config.half_open_probes.max(1);
        let acquired = self
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                (in_flight < limit).then_some(in_flight + 1)
            });
        if acquired.is_ok() {
            Ok(())
        } else {
            Err(RelayError::breaker_open(
                self.binding.clone(),
                Duration::ZERO,
            ))
        }
    }

    fn release_probe(&self) {
        let _ = self
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                Some(in_flight.saturating_sub(1))
            });
    }

    fn transition_to_open(&self) {
        let _guard = self.transition_lock.lock();

        let prev = self.state.swap(CircuitState::Open as u8, Ordering::Release);
        if prev != CircuitState::Open as u8 {
            self.opened_at_ms.store(self.now_ms(), Ordering::Release);
            self.half_open_in_flight.store(0, Ordering::Relaxed);
            warn!(binding = %self.binding, "circuit breaker opened");
            self.events.emit(EventRecord::BreakerOpen {
                binding: self.binding.clone(),
            });
        }
    }

    fn transition_to_half_open(&self) {
        let _guard = self.transition_lock.lock();

        if self.state.load(Ordering::Acquire) == CircuitState::Open as u8
            && self.remaining_cooldown().is_zero()
        {
            self.state
                .store(CircuitState::HalfOpen as u8, Ordering::Release);
            self.half_open_in_flight.store(0, Ordering::Relaxed);
            info!(binding = %self.binding, "circuit breaker half-open, probing");
        }
    }

    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.lock();

        let prev = self
            .state
            .swap(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.half_open_in_flight.store(0, Ordering::Relaxed);
        self.opened_at_ms.store(0, Ordering::Release);

        if prev != CircuitState::Closed as u8 {
            info!(binding = %self.binding, "circuit breaker closed");
            self.events.emit(EventRecord::BreakerClose {
                binding: self.binding.clone(),
            });
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive counted failures
    pub consecutive_failures: u32,
    /// Probes in flight while half-open
    pub half_open_in_flight: u32,
}

/// Lazily-built per-binding breakers sharing one configuration.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    events: EventBus,
    breakers: RwLock<HashMap<BindingKey, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry with the given shared configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            config,
            events,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The breaker guarding `key`, created on first use.
    #[must_use]
    pub fn breaker_for(&self, key: &BindingKey) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(key.clone()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                key.clone(),
                self.config,
                self.events.clone(),
            ))
        }))
    }

    /// Snapshot of every breaker that has been touched.
    #[must_use]
    pub fn stats(&self) -> HashMap<BindingKey, CircuitBreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ErrorKind;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new(BindingKey::from("test:model"), config, EventBus::disabled())
    }

    #[test]
    fn test_initial_state_admits() {
        let cb = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_opens_on_consecutive_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.check().expect_err("open circuit rejects");
        assert_eq!(err.kind, ErrorKind::BreakerOpen);
        assert!(err.retry_after.is_some());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        // Failures were not consecutive, so the circuit stays closed.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_neutral_outcome_does_not_count() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });

        cb.record_failure();
        cb.record_neutral();
        assert_eq!(cb.stats().consecutive_failures, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_resets() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_millis(10),
            half_open_probes: 1,
        });

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
        assert!(cb.check().is_ok());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_millis(10),
            half_open_probes: 1,
        });

        cb.record_failure();
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cb.check().is_ok());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[tokio::test]
    async fn test_half_open_probe_limit() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_millis(10),
            half_open_probes: 1,
        });

        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cb.check().is_ok(), "first probe admitted");
        let err = cb.check().expect_err("second concurrent probe rejected");
        assert_eq!(err.kind, ErrorKind::BreakerOpen);

        // Releasing the probe slot admits the next one.
        cb.record_neutral();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_reset_and_force_open() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_open_event_emitted_once_per_transition() {
        let (observer, mut rx) = relay_core::events::EventObserver::channel(8);
        let cb = CircuitBreaker::new(
            BindingKey::from("test:model"),
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            EventBus::new(vec![observer]),
        );

        cb.record_failure();
        cb.record_failure();

        let mut opens = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EventRecord::BreakerOpen { .. }) {
                opens += 1;
            }
        }
        assert_eq!(opens, 1);
    }

    #[test]
    fn test_registry_reuses_breaker() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), EventBus::disabled());
        let key = BindingKey::from("a:b");

        let first = registry.breaker_for(&key);
        first.force_open();

        let second = registry.breaker_for(&key);
        assert_eq!(second.state(), CircuitState::Open);
    }
}
