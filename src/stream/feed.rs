//! Polygon-style WebSocket push-feed client
//!
//! Frames are JSON arrays of events tagged by `ev`. The client authenticates,
//! subscribes once authentication succeeds, and hands every frame's data
//! events to the router as one batch. Dropped connections are retried with
//! backoff until the token is cancelled.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::config::StreamConfig;
use crate::models::StreamMessage;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Router channel closed")]
    ChannelClosed,

    #[error("Maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl FeedError {
    /// Worth reconnecting after
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::WebSocket(_) | FeedError::ConnectionClosed
        )
    }
}

/// One decoded event
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Status { status: String, message: String },
    Data(StreamMessage),
}

/// Decode a text frame (an array of events, or a single event object)
///
/// Data events without a `sym` are skipped.
pub fn decode_frame(text: &str) -> Result<Vec<FeedEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let objects = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    Ok(objects
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => decode_event(object),
            _ => None,
        })
        .collect())
}

fn decode_event(object: Map<String, Value>) -> Option<FeedEvent> {
    let event_type = object.get("ev").and_then(Value::as_str).unwrap_or_default();

    if event_type == "status" {
        let field = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Some(FeedEvent::Status {
            status: field("status"),
            message: field("message"),
        });
    }

    let symbol = object.get("sym").and_then(Value::as_str)?.to_string();
    if symbol.is_empty() {
        return None;
    }

    // (price, volume, timestamp) field names per event type
    let fields = match event_type {
        "AM" | "A" => Some(("c", "v", "s")),
        "T" => Some(("p", "s", "t")),
        _ => None,
    };

    let mut message = StreamMessage::new(symbol);
    if let Some((price, volume, timestamp)) = fields {
        message.price = object.get(price).and_then(Value::as_f64);
        message.volume = object.get(volume).and_then(Value::as_f64);
        message.event_timestamp = object.get(timestamp).filter(|v| !v.is_null()).cloned();
    }
    message.raw = object;

    Some(FeedEvent::Data(message))
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub api_key: String,
    /// Subscription params, e.g. "AM.*"
    pub subscription: String,
    pub reconnect: ReconnectConfig,
}

impl FeedConfig {
    pub fn new(stream: &StreamConfig, api_key: impl Into<String>) -> Self {
        Self {
            url: stream.feed_url.clone(),
            api_key: api_key.into(),
            subscription: stream.subscription.clone(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

pub struct PolygonFeedClient {
    config: FeedConfig,
    tx: mpsc::Sender<Vec<StreamMessage>>,
    cancel: CancellationToken,
}

impl PolygonFeedClient {
    pub fn new(
        config: FeedConfig,
        tx: mpsc::Sender<Vec<StreamMessage>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, tx, cancel }
    }

    /// Connect and forward batches until cancelled or a non-retryable error
    pub async fn run(self) -> Result<(), FeedError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Feed client stopped");
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!("❌ Feed stopped: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("⚠️  Feed connection lost: {}", e);
                    let Some(delay) = policy.next_delay() else {
                        return Err(FeedError::MaxReconnectAttemptsExceeded);
                    };
                    tracing::info!(
                        "Reconnecting to feed in {:?} (attempt {})",
                        delay,
                        policy.attempts()
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Hand a batch to the router
    ///
    /// Returns `Ok(false)` when the router has already gone away because of
    /// shutdown; a closed channel outside shutdown is an error.
    async fn forward(&self, batch: Vec<StreamMessage>) -> Result<bool, FeedError> {
        if self.tx.send(batch).await.is_ok() {
            return Ok(true);
        }
        if self.cancel.is_cancelled() {
            return Ok(false);
        }
        Err(FeedError::ChannelClosed)
    }

    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedError> {
        tracing::info!("🔌 Connecting to feed at {}", self.config.url);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.config.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let auth = json!({"action": "auth", "params": self.config.api_key});
        write.send(Message::Text(auth.to_string().into())).await?;

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let events = match decode_frame(text.as_str()) {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!("Skipping malformed feed frame: {}", e);
                            continue;
                        }
                    };

                    let mut batch = Vec::new();
                    for event in events {
                        match event {
                            FeedEvent::Data(message) => batch.push(message),
                            FeedEvent::Status { status, message } => match status.as_str() {
                                "auth_success" => {
                                    tracing::info!("Feed authenticated, subscribing to {}", self.config.subscription);
                                    let subscribe = json!({
                                        "action": "subscribe",
                                        "params": self.config.subscription,
                                    });
                                    write.send(Message::Text(subscribe.to_string().into())).await?;
                                    policy.reset();
                                }
                                "auth_failed" => return Err(FeedError::AuthFailed(message)),
                                _ => tracing::debug!("Feed status {}: {}", status, message),
                            },
                        }
                    }

                    if !batch.is_empty() && !self.forward(batch).await? {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FeedError::ConnectionClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(events: Vec<FeedEvent>) -> Vec<StreamMessage> {
        events
            .into_iter()
            .filter_map(|e| match e {
                FeedEvent::Data(m) => Some(m),
                FeedEvent::Status { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_decode_aggregate_events() {
        let frame = r#"[{"ev":"AM","sym":"AAPL","v":4110,"o":189.1,"c":189.25,"s":1700000000000,"e":1700000060000},
                        {"ev":"A","sym":"MSFT","v":12,"c":370.5,"s":1700000001000}]"#;
        let messages = data(decode_frame(frame).unwrap());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].symbol, "AAPL");
        assert_eq!(messages[0].price, Some(189.25));
        assert_eq!(messages[0].volume, Some(4110.0));
        assert_eq!(messages[0].event_timestamp, Some(json!(1700000000000u64)));
        assert_eq!(messages[0].raw["o"], json!(189.1));
        assert_eq!(messages[1].price, Some(370.5));
    }

    #[test]
    fn test_decode_trade_event() {
        let frame = r#"[{"ev":"T","sym":"IBM","p":141.2,"s":100,"t":1700000000123}]"#;
        let messages = data(decode_frame(frame).unwrap());

        assert_eq!(messages[0].price, Some(141.2));
        assert_eq!(messages[0].volume, Some(100.0));
        assert_eq!(messages[0].event_timestamp, Some(json!(1700000000123u64)));
    }

    #[test]
    fn test_decode_unknown_event_keeps_raw_only() {
        let frame = r#"[{"ev":"Q","sym":"IBM","bp":1.0}]"#;
        let messages = data(decode_frame(frame).unwrap());

        assert_eq!(messages[0].price, None);
        assert_eq!(messages[0].volume, None);
        assert_eq!(messages[0].event_timestamp, None);
        assert_eq!(messages[0].raw["bp"], json!(1.0));
    }

    #[test]
    fn test_status_and_symbolless_events() {
        let frame = r#"[{"ev":"status","status":"auth_success","message":"authenticated"},
                        {"ev":"AM","c":1.0},
                        {"ev":"AM","sym":"","c":1.0},
                        "noise"]"#;
        let events = decode_frame(frame).unwrap();

        assert_eq!(
            events,
            vec![FeedEvent::Status {
                status: "auth_success".into(),
                message: "authenticated".into()
            }]
        );
    }

    #[test]
    fn test_single_object_frame_and_garbage() {
        let events = decode_frame(r#"{"ev":"AM","sym":"AAPL","c":2.5}"#).unwrap();
        assert_eq!(data(events)[0].price, Some(2.5));

        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(FeedError::ConnectionClosed.is_retryable());
        assert!(!FeedError::AuthFailed("bad key".into()).is_retryable());
        assert!(!FeedError::ChannelClosed.is_retryable());
    }

    fn client(cancel: &CancellationToken) -> (PolygonFeedClient, mpsc::Receiver<Vec<StreamMessage>>) {
        let (tx, rx) = mpsc::channel(4);
        let config = FeedConfig::new(&StreamConfig::default(), "key");
        (PolygonFeedClient::new(config, tx, cancel.clone()), rx)
    }

    #[tokio::test]
    async fn test_forward_delivers_batch() {
        let cancel = CancellationToken::new();
        let (feed, mut rx) = client(&cancel);

        assert!(feed.forward(vec![StreamMessage::new("AAPL")]).await.unwrap());
        assert_eq!(rx.recv().await.unwrap()[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_router_gone_during_shutdown_is_clean_stop() {
        let cancel = CancellationToken::new();
        let (feed, rx) = client(&cancel);
        cancel.cancel();
        drop(rx);

        let delivered = feed.forward(vec![StreamMessage::new("AAPL")]).await.unwrap();

        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_router_gone_while_running_is_error() {
        let cancel = CancellationToken::new();
        let (feed, rx) = client(&cancel);
        drop(rx);

        let result = feed.forward(vec![StreamMessage::new("AAPL")]).await;

        assert!(matches!(result, Err(FeedError::ChannelClosed)));
    }

    #[test]
    fn test_feed_config_from_stream_config() {
        let config = FeedConfig::new(&StreamConfig::default(), "key");
        assert_eq!(config.url, "wss://delayed.polygon.io/stocks");
        assert_eq!(config.subscription, "AM.*");
        assert_eq!(config.api_key, "key");
    }
}
