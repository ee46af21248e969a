use lapin::{
    options::*,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::RabbitMQConfig;
use crate::bus::{BusError, MessageBus, OutboundMessage, PublishHandle};
use crate::stream::ReconnectPolicy;

/// Error types for RabbitMQ connection management
#[derive(Debug, thiserror::Error)]
pub enum RabbitMQError {
    #[error("Connection error: {0}")]
    Connection(#[from] lapin::Error),

    #[error("Connection to {uri} timed out after {secs}s")]
    ConnectTimeout { uri: String, secs: u64 },
}

pub type Result<T> = std::result::Result<T, RabbitMQError>;

/// Statistics for RabbitMQ publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherStats {
    pub messages_published: u64,
    pub messages_confirmed: u64,
    pub messages_failed: u64,
    pub reconnects: u64,
    pub is_connected: bool,
}

#[derive(Default)]
struct PublisherCounters {
    published: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    reconnects: AtomicU64,
}

/// Connection liveness, shared with lapin's error callback and publish tasks
#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    lost: Notify,
}

impl LinkState {
    fn is_up(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn mark_up(&self) {
        self.connected.store(true, Ordering::Release);
    }

    /// Mark the link down and wake the supervisor; true only on the transition
    fn mark_lost(&self) -> bool {
        let was_up = self.connected.swap(false, Ordering::AcqRel);
        if was_up {
            self.lost.notify_one();
        }
        was_up
    }
}

/// RabbitMQ publisher backing the [`MessageBus`] port
///
/// Every publish is spawned onto the runtime, so callers get a handle back
/// without waiting for the broker.
pub struct RabbitMQPublisher {
    config: RabbitMQConfig,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    link: Arc<LinkState>,
    counters: Arc<PublisherCounters>,
}

impl RabbitMQPublisher {
    /// Create a new RabbitMQ publisher
    pub fn new(config: RabbitMQConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            channel: RwLock::new(None),
            link: Arc::new(LinkState::default()),
            counters: Arc::new(PublisherCounters::default()),
        }
    }

    /// Connect to RabbitMQ server and declare the exchange
    pub async fn connect(&self) -> Result<()> {
        tracing::info!("Connecting to RabbitMQ at {}", self.config.uri);

        let connection = tokio::time::timeout(
            Duration::from_secs(self.config.connection_timeout_secs),
            Connection::connect(&self.config.uri, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| RabbitMQError::ConnectTimeout {
            uri: self.config.uri.clone(),
            secs: self.config.connection_timeout_secs,
        })??;

        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                self.parse_exchange_type(),
                ExchangeDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: false,
                    internal: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        if self.config.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
            tracing::info!("Publisher confirms enabled");
        }

        let link = Arc::clone(&self.link);
        connection.on_error(move |err| {
            if link.mark_lost() {
                tracing::error!("🐰 RabbitMQ connection lost: {}", err);
            }
        });

        *self.connection.write() = Some(connection);
        *self.channel.write() = Some(channel);
        self.link.mark_up();

        tracing::info!("Successfully connected to RabbitMQ");
        Ok(())
    }

    /// Disconnect from RabbitMQ
    pub async fn disconnect(&self) {
        tracing::info!("Disconnecting from RabbitMQ");
        self.link.connected.store(false, Ordering::Release);

        let channel = self.channel.write().take();
        if let Some(channel) = channel {
            let _ = channel.close(200, "Normal shutdown").await;
        }

        let connection = self.connection.write().take();
        if let Some(connection) = connection {
            let _ = connection.close(200, "Normal shutdown").await;
        }

        tracing::info!("Disconnected from RabbitMQ");
    }

    /// Drop whatever is left of the old connection and connect again
    pub async fn reconnect(&self) -> Result<()> {
        tracing::info!("Attempting to reconnect to RabbitMQ");
        self.disconnect().await;
        self.connect().await?;

        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        tracing::info!("✅ Reconnected to RabbitMQ");
        Ok(())
    }

    /// Re-establish the connection each time it drops, until `cancel` fires
    ///
    /// Publishes made while the link is down fail fast with `NotConnected`.
    pub async fn maintain_connection(&self, cancel: CancellationToken) {
        let policy = ReconnectPolicy::new(self.config.reconnect.clone());
        supervise(&self.link, policy, &cancel, move || self.reconnect()).await;
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    /// Get publisher statistics
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            messages_published: self.counters.published.load(Ordering::Relaxed),
            messages_confirmed: self.counters.confirmed.load(Ordering::Relaxed),
            messages_failed: self.counters.failed.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            is_connected: self.is_connected(),
        }
    }

    /// Parse exchange type from string
    fn parse_exchange_type(&self) -> ExchangeKind {
        match self.config.exchange_type.to_lowercase().as_str() {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "headers" => ExchangeKind::Headers,
            _ => ExchangeKind::Topic,
        }
    }

    fn properties(message_id: &str, headers: &[(String, String)]) -> BasicProperties {
        let mut table = FieldTable::default();
        for (key, value) in headers {
            table.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }

        BasicProperties::default()
            .with_message_id(ShortString::from(message_id.to_string()))
            .with_content_type(ShortString::from("application/json".to_string()))
            .with_delivery_mode(2)
            .with_headers(table)
    }
}

impl MessageBus for RabbitMQPublisher {
    fn publish(&self, message: OutboundMessage) -> PublishHandle {
        let channel = match (self.is_connected(), self.channel.read().clone()) {
            (true, Some(channel)) => channel,
            _ => return PublishHandle::ready(Err(BusError::NotConnected)),
        };

        let exchange = self.config.exchange.clone();
        let confirms = self.config.publisher_confirms;
        let counters = Arc::clone(&self.counters);
        let link = Arc::clone(&self.link);
        let message_id = Uuid::new_v4().to_string();
        let properties = Self::properties(&message_id, &message.headers);

        PublishHandle::spawn(async move {
            let confirm = match channel
                .basic_publish(
                    &exchange,
                    &message.topic,
                    BasicPublishOptions::default(),
                    &message.payload,
                    properties,
                )
                .await
            {
                Ok(confirm) => confirm,
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    report_channel_state(&channel, &link);
                    return Err(BusError::PublishFailed(e.to_string()));
                }
            };

            counters.published.fetch_add(1, Ordering::Relaxed);

            if confirms {
                match confirm.await {
                    Ok(confirmation) if confirmation.is_nack() => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        return Err(BusError::Nacked);
                    }
                    Ok(_) => {
                        counters.confirmed.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Message confirmed: routing_key={}", message.topic);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        report_channel_state(&channel, &link);
                        return Err(BusError::PublishFailed(e.to_string()));
                    }
                }
            }

            Ok(message_id)
        })
    }
}

/// A failed publish on a closed channel means the link is gone
fn report_channel_state(channel: &Channel, link: &LinkState) {
    if !channel.status().connected() && link.mark_lost() {
        tracing::error!("🐰 RabbitMQ channel closed, publishing paused until reconnect");
    }
}

/// Wait for the link to drop, then reconnect with backoff until it is up
async fn supervise<F, Fut>(
    link: &LinkState,
    mut policy: ReconnectPolicy,
    cancel: &CancellationToken,
    mut reconnect: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = link.lost.notified() => {}
        }

        while !link.is_up() {
            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    "❌ RabbitMQ: giving up after {} reconnect attempts",
                    policy.attempts()
                );
                return;
            };
            tracing::warn!(
                "RabbitMQ reconnect attempt {} in {:?}",
                policy.attempts(),
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = reconnect().await {
                tracing::warn!("RabbitMQ reconnect failed: {}", e);
            }
        }

        policy.reset();
    }
}
