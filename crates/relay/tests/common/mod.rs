//! Scripted in-process mock providers for integration testing.

#![allow(dead_code)]

use async_trait::async_trait;
use relay::{
    CallOptions, ChatDelta, ChatProvider, ChatRequest, ChatResponse, DeltaStream, EventRecord,
    JitterMode, Message, PriceTable, RelayError, Result, RetryConfig, TokenUsage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A provider whose per-call outcomes are scripted up front.
///
/// Once the script runs dry, every further call succeeds with `"ok"`.
pub struct MockProvider {
    id: String,
    price: Option<PriceTable>,
    delay: Duration,
    usage: Option<TokenUsage>,
    reported_cost: Option<f64>,
    script: Mutex<VecDeque<Result<String>>>,
    stream_script: Mutex<VecDeque<Vec<Result<ChatDelta>>>>,
    stream_frame_delay: Duration,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    observed_cancel: Arc<AtomicBool>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            price: None,
            delay: Duration::ZERO,
            usage: None,
            reported_cost: None,
            script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(VecDeque::new()),
            stream_frame_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            observed_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_price(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.price = Some(PriceTable::new(input_per_1k, output_per_1k));
        self
    }

    /// Every call sleeps this long before answering, observing cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_usage(mut self, input: u32, output: u32) -> Self {
        self.usage = Some(TokenUsage::new(input, output));
        self
    }

    pub fn with_reported_cost(mut self, cost_usd: f64) -> Self {
        self.reported_cost = Some(cost_usd);
        self
    }

    /// Queue the outcomes of the next unary calls, in order.
    pub fn script(self, outcomes: Vec<Result<String>>) -> Self {
        *self.script.lock().unwrap() = outcomes.into();
        self
    }

    /// Queue the frame lists for the next streaming calls, in order.
    pub fn stream_script(self, scripts: Vec<Vec<Result<ChatDelta>>>) -> Self {
        *self.stream_script.lock().unwrap() = scripts.into();
        self
    }

    /// Sleep between streamed frames, observing cancellation.
    pub fn with_stream_frame_delay(mut self, delay: Duration) -> Self {
        self.stream_frame_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Whether any call saw its cancellation token fire mid-flight.
    pub fn observed_cancel(&self) -> bool {
        self.observed_cancel.load(Ordering::SeqCst)
    }

    fn respond(&self, content: String, model: &str) -> ChatResponse {
        let mut response = ChatResponse::new(content, self.id.clone(), model);
        response.usage = self.usage;
        response.cost_usd = self.reported_cost;
        response
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn price(&self) -> Option<&PriceTable> {
        self.price.as_ref()
    }

    async fn chat(&self, request: &ChatRequest, options: &CallOptions) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                kind = options.cancel.cancelled() => {
                    self.observed_cancel.store(true, Ordering::SeqCst);
                    return Err(RelayError::from_cancel(kind));
                }
            }
        }

        match self.script.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(self.respond(content, &request.model)),
            Some(Err(error)) => Err(error),
            None => Ok(self.respond("ok".to_string(), &request.model)),
        }
    }

    async fn stream(&self, _request: &ChatRequest, options: &CallOptions) -> Result<DeltaStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let Some(frames) = self.stream_script.lock().unwrap().pop_front() else {
            return Err(RelayError::client(format!(
                "provider {} does not support streaming",
                self.id
            )));
        };

        let cancel = options.cancel.clone();
        let observed = Arc::clone(&self.observed_cancel);
        let frame_delay = self.stream_frame_delay;
        Ok(Box::pin(async_stream::stream! {
            for frame in frames {
                if !frame_delay.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(frame_delay) => {}
                        _ = cancel.cancelled() => {
                            observed.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                }
                if cancel.is_cancelled() {
                    observed.store(true, Ordering::SeqCst);
                    return;
                }
                yield frame;
            }
        }))
    }
}

/// A request resolving through the registry.
pub fn request(model: &str) -> ChatRequest {
    ChatRequest::builder()
        .model(model)
        .message(Message::user("hello"))
        .build()
        .expect("valid request")
}

/// A request addressing a provider directly.
pub fn direct_request(provider: &str, model: &str) -> ChatRequest {
    ChatRequest::builder()
        .model(model)
        .provider(provider)
        .message(Message::user("hello"))
        .build()
        .expect("valid request")
}

/// Deterministic, fast retry policy for tests.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        jitter: JitterMode::None,
    }
}

/// Drain every event currently buffered in an observer channel.
pub fn drain_events(rx: &mut mpsc::Receiver<EventRecord>) -> Vec<EventRecord> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
