//! Token-bucket admission control.
//!
//! Each configured binding owns a bucket refilled continuously at `rps`
//! tokens per second up to `burst`. Callers block until one token is
//! available; bindings without a configured rule pass through immediately.

use parking_lot::Mutex;
use relay_core::events::{EventBus, EventRecord};
use relay_core::{BindingKey, CancelToken, RelayError, RequestId, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Admission rule for one binding.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitRule {
    /// Sustained admissions per second. Must be positive.
    pub rps: f64,
    /// Bucket capacity; at least `rps`.
    pub burst: f64,
}

impl RateLimitRule {
    /// Rule with `burst` defaulting to `rps`.
    #[must_use]
    pub fn new(rps: f64) -> Self {
        Self { rps, burst: rps }
    }

    /// Set the burst capacity; values below `rps` are raised to `rps`.
    #[must_use]
    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = burst.max(self.rps);
        self
    }
}

/// Snapshot of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStats {
    /// Tokens currently available.
    pub tokens: f64,
    /// Sustained refill rate.
    pub rps: f64,
    /// Bucket capacity.
    pub burst: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    rule: RateLimitRule,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(rule: RateLimitRule) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: rule.burst,
                last_refill: Instant::now(),
            }),
            rule,
        }
    }

    /// Take one token, or report how long until one becomes available.
    ///
    /// The state update is mutually exclusive per binding; waiting happens
    /// outside the lock so concurrent acquirers queue in parallel.
    fn try_take(&self) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rule.rps).min(self.rule.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let wait_ms = ((1.0 - state.tokens) / self.rule.rps * 1000.0).ceil();
            Err(Duration::from_millis(wait_ms as u64))
        }
    }

    fn stats(&self) -> BucketStats {
        let state = self.state.lock();
        BucketStats {
            tokens: state.tokens,
            rps: self.rule.rps,
            burst: self.rule.burst,
        }
    }
}

/// Per-binding token-bucket limiter.
pub struct RateLimiter {
    buckets: HashMap<BindingKey, Bucket>,
    events: EventBus,
}

impl RateLimiter {
    /// Build a limiter from configured rules.
    ///
    /// Rules with a non-positive rate are ignored with a warning.
    #[must_use]
    pub fn new(rules: HashMap<BindingKey, RateLimitRule>, events: EventBus) -> Self {
        let mut buckets = HashMap::with_capacity(rules.len());
        for (key, mut rule) in rules {
            if rule.rps <= 0.0 {
                warn!(binding = %key, rps = rule.rps, "ignoring rate limit rule with non-positive rate");
                continue;
            }
            rule.burst = rule.burst.max(rule.rps);
            buckets.insert(key, Bucket::new(rule));
        }
        Self { buckets, events }
    }

    /// Block until one token is available for `key`.
    ///
    /// Bindings without a rule are admitted immediately.
    ///
    /// # Errors
    /// Returns the classified cancellation error when `cancel` fires while
    /// waiting; no token is consumed in that case.
    pub async fn acquire(
        &self,
        key: &BindingKey,
        request_id: RequestId,
        cancel: &CancelToken,
    ) -> Result<()> {
        let Some(bucket) = self.buckets.get(key) else {
            return Ok(());
        };

        loop {
            match bucket.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    debug!(
                        binding = %key,
                        wait_ms = wait.as_millis() as u64,
                        "waiting for limiter token"
                    );
                    self.events.emit(EventRecord::LimiterWait {
                        binding: key.clone(),
                        request_id,
                        wait_ms: wait.as_millis() as u64,
                    });
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        kind = cancel.cancelled() => {
                            return Err(RelayError::from_cancel(kind)
                                .with_binding(key.clone())
                                .with_request_id(request_id));
                        }
                    }
                }
            }
        }
    }

    /// Snapshot of the bucket for `key`, if one is configured.
    #[must_use]
    pub fn stats(&self, key: &BindingKey) -> Option<BucketStats> {
        self.buckets.get(key).map(Bucket::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::events::EventObserver;
    use relay_core::CancelKind;
    use relay_core::ErrorKind;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    fn limiter_with(rps: f64, burst: f64) -> (RateLimiter, BindingKey) {
        let key = BindingKey::from("x:m");
        let mut rules = HashMap::new();
        rules.insert(key.clone(), RateLimitRule::new(rps).with_burst(burst));
        (RateLimiter::new(rules, EventBus::disabled()), key)
    }

    #[tokio::test]
    async fn test_unknown_binding_passes_through() {
        let (limiter, _key) = limiter_with(1.0, 1.0);
        let other = BindingKey::from("y:n");
        limiter
            .acquire(&other, RequestId::generate(), &CancelToken::new())
            .await
            .expect("no rule means no wait");
    }

    #[tokio::test]
    async fn test_burst_admits_immediately() {
        let (limiter, key) = limiter_with(1.0, 3.0);
        let cancel = CancelToken::new();
        let start = Instant::now();
        for _ in 0..3 {
            limiter
                .acquire(&key, RequestId::generate(), &cancel)
                .await
                .expect("burst tokens available");
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_exhausted_bucket_waits_for_refill() {
        let (limiter, key) = limiter_with(10.0, 10.0);
        let cancel = CancelToken::new();

        for _ in 0..10 {
            limiter.acquire(&key, RequestId::generate(), &cancel).await.unwrap();
        }
        let start = Instant::now();
        limiter.acquire(&key, RequestId::generate(), &cancel).await.unwrap();

        // One token refills after ~100ms at 10 rps.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(80), "waited {waited:?}");
    }

    #[test]
    fn test_burst_never_below_rate() {
        let rule = RateLimitRule::new(10.0).with_burst(1.0);
        assert!((rule.burst - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_admission_bounded_by_rate_plus_burst() {
        let (limiter, key) = limiter_with(8.0, 8.0);
        let limiter = Arc::new(limiter);
        let cancel = CancelToken::new();

        let admitted = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = Arc::clone(&limiter);
            let key = key.clone();
            let cancel = cancel.clone();
            let admitted = Arc::clone(&admitted);
            handles.push(tokio::spawn(async move {
                if limiter
                    .acquire(&key, RequestId::generate(), &cancel)
                    .await
                    .is_ok()
                {
                    admitted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }));
        }

        sleep(Duration::from_millis(250)).await;
        cancel.cancel(CancelKind::Caller);
        for handle in handles {
            let _ = handle.await;
        }

        // rps * 0.25s + burst, with slack for scheduling.
        let count = admitted.load(std::sync::atomic::Ordering::Relaxed);
        assert!(count <= 14, "admitted {count}");
        assert!(count >= 8, "burst should admit at least 8, got {count}");
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let (limiter, key) = limiter_with(0.5, 1.0);
        let cancel = CancelToken::new();

        limiter.acquire(&key, RequestId::generate(), &cancel).await.unwrap();

        let waiter_cancel = cancel.clone();
        let limiter = Arc::new(limiter);
        let waiter_limiter = Arc::clone(&limiter);
        let waiter_key = key.clone();
        let handle = tokio::spawn(async move {
            waiter_limiter
                .acquire(&waiter_key, RequestId::generate(), &waiter_cancel)
                .await
        });

        sleep(Duration::from_millis(20)).await;
        cancel.cancel(CancelKind::Caller);

        let err = handle.await.expect("join").expect_err("canceled");
        assert_eq!(err.kind, ErrorKind::Canceled);
    }

    #[tokio::test]
    async fn test_limiter_wait_event_emitted() {
        let (observer, mut rx) = EventObserver::channel(8);
        let key = BindingKey::from("x:m");
        let mut rules = HashMap::new();
        rules.insert(key.clone(), RateLimitRule::new(20.0));
        let limiter = RateLimiter::new(rules, EventBus::new(vec![observer]));
        let cancel = CancelToken::new();

        // Drain the burst, then one more to force a wait.
        for _ in 0..21 {
            limiter.acquire(&key, RequestId::generate(), &cancel).await.unwrap();
        }

        let mut saw_wait = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EventRecord::LimiterWait { .. }) {
                saw_wait = true;
            }
        }
        assert!(saw_wait);
    }
}
