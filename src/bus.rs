//! Message-bus port
//!
//! Publishing is fire-and-forget: `MessageBus::publish` returns immediately
//! with a [`PublishHandle`] that resolves to the broker-side message id once
//! the message is confirmed. Callers decide whether, and how long, to wait.

use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Identifier assigned to a published message
pub type MessageId = String;

/// Errors surfaced through a publish handle
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publisher not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Broker rejected message")]
    Nacked,

    #[error("Publish not confirmed within {0:?}")]
    Timeout(Duration),

    #[error("Publish task failed: {0}")]
    TaskFailed(String),
}

/// A message ready to go onto the bus
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Topic (routing key) the message is published to
    pub topic: String,
    /// JSON-encoded body
    pub payload: Vec<u8>,
    /// String attributes carried next to the body
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    /// Serialize `body` as JSON for `topic`
    pub fn json<T: Serialize>(topic: impl Into<String>, body: &T) -> Result<Self, BusError> {
        Ok(Self {
            topic: topic.into(),
            payload: serde_json::to_vec(body)?,
            headers: Vec::new(),
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Completion handle for one publish
pub struct PublishHandle {
    inner: BoxFuture<'static, Result<MessageId, BusError>>,
}

impl PublishHandle {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<MessageId, BusError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// Handle that is already resolved
    pub fn ready(result: Result<MessageId, BusError>) -> Self {
        Self::new(async move { result })
    }

    /// Run `future` on the runtime so it makes progress even if the handle is
    /// never awaited
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<MessageId, BusError>> + Send + 'static,
    {
        let task: JoinHandle<Result<MessageId, BusError>> = tokio::spawn(future);
        Self::new(async move {
            task.await
                .map_err(|e| BusError::TaskFailed(e.to_string()))?
        })
    }

    /// Wait for the outcome, giving up after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<MessageId, BusError> {
        match tokio::time::timeout(timeout, self.inner).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(timeout)),
        }
    }
}

/// Publish endpoint of the message bus
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: OutboundMessage) -> PublishHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_json() {
        let message = OutboundMessage::json("xnys-websocket", &serde_json::json!({"a": 1}))
            .unwrap()
            .with_header("origin", "test");

        assert_eq!(message.topic, "xnys-websocket");
        assert_eq!(message.payload, br#"{"a":1}"#.to_vec());
        assert_eq!(message.header("origin"), Some("test"));
        assert_eq!(message.header("type"), None);
    }

    #[tokio::test]
    async fn test_ready_handle() {
        let id = PublishHandle::ready(Ok("42".to_string()))
            .wait(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(id, "42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_times_out() {
        let handle = PublishHandle::new(futures::future::pending());
        let result = handle.wait(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(BusError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_spawned_handle_reports_panic() {
        let handle = PublishHandle::spawn(async {
            if true {
                panic!("boom");
            }
            Ok("unreachable".to_string())
        });
        let result = handle.wait(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BusError::TaskFailed(_))));
    }
}
