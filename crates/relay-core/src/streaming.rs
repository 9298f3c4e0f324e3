//! Streaming chat frames.

use crate::error::{RelayError, Result};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};

/// One frame of a streaming response.
///
/// A stream terminates normally when the underlying sequence ends; abnormal
/// termination yields a classified error mirroring unary classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    /// Content fragment, absent for bookkeeping frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Opaque provider payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ChatDelta {
    /// A frame carrying a content fragment.
    #[must_use]
    pub fn content(fragment: impl Into<String>) -> Self {
        Self {
            content: Some(fragment.into()),
            raw: None,
        }
    }
}

/// Boxed lazy sequence of deltas produced by a provider.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta>> + Send>>;

/// A stream of chat deltas handed to the consumer.
///
/// The producer cooperates with cancellation by checking the call's token
/// between frames; the orchestrator additionally terminates the sequence
/// from the outside when the caller cancels.
pub struct ChatStream {
    inner: DeltaStream,
}

impl ChatStream {
    /// Wrap a provider delta sequence.
    #[must_use]
    pub fn new(inner: DeltaStream) -> Self {
        Self { inner }
    }

    /// Drain the stream and concatenate every content fragment.
    ///
    /// # Errors
    /// Returns the first error the stream yields.
    pub async fn collect_content(mut self) -> Result<String> {
        let mut content = String::new();
        while let Some(delta) = self.next().await {
            if let Some(fragment) = delta?.content {
                content.push_str(&fragment);
            }
        }
        Ok(content)
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatDelta>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChatStream")
    }
}

/// Build a [`DeltaStream`] from already-materialized items, useful for
/// providers and tests that do not stream natively.
#[must_use]
pub fn delta_stream_from_iter<I>(items: I) -> DeltaStream
where
    I: IntoIterator<Item = Result<ChatDelta>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(items))
}

/// Shorthand for a stream that fails immediately.
#[must_use]
pub fn failed_delta_stream(error: RelayError) -> DeltaStream {
    delta_stream_from_iter(vec![Err(error)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_content() {
        let stream = ChatStream::new(delta_stream_from_iter(vec![
            Ok(ChatDelta::content("Hello")),
            Ok(ChatDelta::default()),
            Ok(ChatDelta::content(", world")),
        ]));
        assert_eq!(stream.collect_content().await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn test_collect_surfaces_error() {
        let stream = ChatStream::new(delta_stream_from_iter(vec![
            Ok(ChatDelta::content("partial")),
            Err(RelayError::server("mid-stream failure")),
        ]));
        let err = stream.collect_content().await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Server);
    }
}
