//! Streaming calls: delta flow, restart-before-first-delta, and
//! cancellation.

mod common;

use common::{direct_request, fast_retry, MockProvider};
use futures::StreamExt;
use relay::{
    CancelKind, CancelToken, ChatDelta, ErrorKind, Orchestrator, OrchestratorConfig, RelayError,
};
use std::sync::Arc;
use std::time::Duration;

fn deltas(fragments: &[&str]) -> Vec<relay::Result<ChatDelta>> {
    fragments
        .iter()
        .map(|fragment| Ok(ChatDelta::content(*fragment)))
        .collect()
}

#[tokio::test]
async fn test_stream_happy_path_collects_content() {
    let provider = Arc::new(
        MockProvider::new("x").stream_script(vec![deltas(&["Hel", "lo", ", world"])]),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::builder()
            .provider("x", Arc::clone(&provider) as Arc<dyn relay::ChatProvider>)
            .build(),
    ));

    let stream = orchestrator
        .stream(direct_request("x", "m"))
        .await
        .expect("open stream");
    let content = stream.collect_content().await.expect("collect");

    assert_eq!(content, "Hello, world");
    assert_eq!(provider.stream_calls(), 1);
}

#[tokio::test]
async fn test_stream_restarts_before_first_delta() {
    let provider = Arc::new(MockProvider::new("x").stream_script(vec![
        vec![Err(RelayError::server("503 before any delta"))],
        deltas(&["recovered"]),
    ]));
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::builder()
            .provider("x", Arc::clone(&provider) as Arc<dyn relay::ChatProvider>)
            .retry(fast_retry(3))
            .build(),
    ));

    let stream = orchestrator
        .stream(direct_request("x", "m"))
        .await
        .expect("open stream");
    let content = stream.collect_content().await.expect("collect");

    assert_eq!(content, "recovered");
    assert_eq!(provider.stream_calls(), 2);
}

#[tokio::test]
async fn test_stream_error_after_first_delta_is_not_retried() {
    let provider = Arc::new(MockProvider::new("x").stream_script(vec![
        vec![
            Ok(ChatDelta::content("partial")),
            Err(RelayError::server("mid-stream failure")),
        ],
        deltas(&["never used"]),
    ]));
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::builder()
            .provider("x", Arc::clone(&provider) as Arc<dyn relay::ChatProvider>)
            .retry(fast_retry(3))
            .build(),
    ));

    let mut stream = orchestrator
        .stream(direct_request("x", "m"))
        .await
        .expect("open stream");

    let first = stream.next().await.unwrap().expect("first delta");
    assert_eq!(first.content.as_deref(), Some("partial"));

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Server);
    assert!(stream.next().await.is_none());
    assert_eq!(provider.stream_calls(), 1);
}

#[tokio::test]
async fn test_stream_open_failure_exhausts_retries() {
    let provider = Arc::new(MockProvider::new("x").stream_script(vec![
        vec![Err(RelayError::server("a"))],
        vec![Err(RelayError::server("b"))],
    ]));
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::builder()
            .provider("x", Arc::clone(&provider) as Arc<dyn relay::ChatProvider>)
            .retry(fast_retry(2))
            .build(),
    ));

    let stream = orchestrator
        .stream(direct_request("x", "m"))
        .await
        .expect("open stream");
    let err = stream.collect_content().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(err.message, "b");
    assert_eq!(err.attempts, 2);
}

#[tokio::test]
async fn test_stream_cancellation_terminates_producer() {
    let provider = Arc::new(
        MockProvider::new("x")
            .stream_script(vec![deltas(&["a", "b", "c", "d", "e", "f"])])
            .with_stream_frame_delay(Duration::from_millis(100)),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::builder()
            .provider("x", Arc::clone(&provider) as Arc<dyn relay::ChatProvider>)
            .build(),
    ));

    let cancel = CancelToken::new();
    let mut stream = orchestrator
        .stream_with(direct_request("x", "m"), cancel.clone())
        .await
        .expect("open stream");

    let first = stream.next().await.unwrap().expect("first delta");
    assert_eq!(first.content.as_deref(), Some("a"));

    cancel.cancel(CancelKind::Caller);

    let err = stream
        .next()
        .await
        .expect("cancellation surfaces as an item")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Canceled);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(provider.observed_cancel());
}

#[tokio::test]
async fn test_streaming_unsupported_surfaces_client_error() {
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::builder()
            .provider("x", Arc::new(MockProvider::new("x")))
            .build(),
    ));

    let stream = orchestrator
        .stream(direct_request("x", "m"))
        .await
        .expect("open stream");
    let err = stream.collect_content().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Client);
    assert!(err.message.contains("does not support streaming"));
}
