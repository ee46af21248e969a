use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::bus::{MessageBus, OutboundMessage};
use crate::market_cap::publisher::ORIGIN;
use crate::membership::MembershipStore;
use crate::models::{Exchange, StreamMessage};
use crate::rabbitmq::RoutingKeyBuilder;

/// Router state, for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RouterState {
    Idle,
    Routing,
}

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the bus on the exchange's stream topic
    Routed { exchange: Exchange, topic: String },
    /// Symbol not tracked by any exchange
    Dropped,
    /// Message could not be encoded
    Failed,
}

/// Body published for a routed message
#[derive(Debug, Serialize)]
struct RoutedMessage<'a> {
    exchange: Exchange,
    symbol: &'a str,
    price: Option<f64>,
    volume: Option<f64>,
    timestamp: Option<&'a Value>,
    raw: &'a Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct RouterStats {
    received: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    per_exchange: Mutex<HashMap<Exchange, u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RouterStatsSnapshot {
    pub state: RouterState,
    pub received: u64,
    pub routed: u64,
    pub dropped: u64,
    /// Messages that could not be encoded or were not confirmed by the bus
    pub failed: u64,
    pub per_exchange: Vec<ExchangeRouted>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExchangeRouted {
    pub exchange: Exchange,
    pub routed: u64,
}

impl RouterStats {
    fn routed_to(&self, exchange: Exchange) {
        self.routed.fetch_add(1, Ordering::Relaxed);
        *self.per_exchange.lock().entry(exchange).or_default() += 1;
    }

    fn snapshot(&self, state: RouterState) -> RouterStatsSnapshot {
        let mut per_exchange: Vec<ExchangeRouted> = self
            .per_exchange
            .lock()
            .iter()
            .map(|(exchange, routed)| ExchangeRouted {
                exchange: *exchange,
                routed: *routed,
            })
            .collect();
        per_exchange.sort_by_key(|e| e.exchange);

        RouterStatsSnapshot {
            state,
            received: self.received.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            per_exchange,
        }
    }
}

/// Routes feed messages to the stream topic of the exchange that lists them
///
/// Publish handles are awaited on spawned tasks so a slow broker never holds
/// up the next message.
pub struct StreamRouter {
    store: Arc<MembershipStore>,
    bus: Arc<dyn MessageBus>,
    publish_timeout: Duration,
    stats: Arc<RouterStats>,
    routing: AtomicBool,
}

impl StreamRouter {
    pub fn new(
        store: Arc<MembershipStore>,
        bus: Arc<dyn MessageBus>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            publish_timeout,
            stats: Arc::new(RouterStats::default()),
            routing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RouterState {
        if self.routing.load(Ordering::Acquire) {
            RouterState::Routing
        } else {
            RouterState::Idle
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot(self.state())
    }

    /// Route one message; must be called from within the runtime
    pub fn route(&self, message: &StreamMessage) -> RouteOutcome {
        self.routing.store(true, Ordering::Release);
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let outcome = self.dispatch(message);

        self.routing.store(false, Ordering::Release);
        outcome
    }

    fn dispatch(&self, message: &StreamMessage) -> RouteOutcome {
        let membership = self.store.current();
        let Some(exchange) = membership.first_match(&message.symbol) else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("{}: not tracked, dropped", message.symbol);
            return RouteOutcome::Dropped;
        };

        let topic = RoutingKeyBuilder::stream(exchange);
        let body = RoutedMessage {
            exchange,
            symbol: &message.symbol,
            price: message.price,
            volume: message.volume,
            timestamp: message.event_timestamp.as_ref(),
            raw: &message.raw,
        };
        let outbound = match OutboundMessage::json(&topic, &body) {
            Ok(outbound) => outbound.with_header("origin", ORIGIN).with_header("type", "stream"),
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("{}: failed to encode routed message: {}", message.symbol, e);
                return RouteOutcome::Failed;
            }
        };

        let handle = self.bus.publish(outbound);
        self.stats.routed_to(exchange);
        tracing::trace!("{} -> {}", message.symbol, topic);

        let stats = Arc::clone(&self.stats);
        let timeout = self.publish_timeout;
        let symbol = message.symbol.clone();
        let failed_topic = topic.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.wait(timeout).await {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to publish {} to {}: {}", symbol, failed_topic, e);
            }
        });

        RouteOutcome::Routed { exchange, topic }
    }

    /// Consume feed batches until the channel closes or `cancel` fires
    ///
    /// Cancellation is checked between messages, so the message being routed
    /// always completes.
    pub async fn run(&self, mut rx: mpsc::Receiver<Vec<StreamMessage>>, cancel: CancellationToken) {
        tracing::info!("📡 Stream router started");

        'batches: loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            for message in &batch {
                if cancel.is_cancelled() {
                    break 'batches;
                }
                self.route(message);
            }
        }

        let stats = self.stats();
        tracing::info!(
            "Stream router stopped: {} received, {} routed, {} dropped, {} failed",
            stats.received,
            stats.routed,
            stats.dropped,
            stats.failed
        );
    }
}
