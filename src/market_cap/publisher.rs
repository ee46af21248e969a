//! Fan-out of a ranked snapshot onto the bus
//!
//! Every record and the summary are published before any handle is awaited.
//! Handles are then awaited concurrently, each with its own timeout, and a
//! failed or late publish only costs its own slot in the report.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{BusError, MessageBus, MessageId, OutboundMessage, PublishHandle};
use crate::models::{Exchange, RankedSnapshot, Ticker};
use crate::rabbitmq::RoutingKeyBuilder;

/// Value of the `origin` header on everything this crate publishes
pub const ORIGIN: &str = "marketcap-router";

#[derive(Debug, Serialize)]
pub struct MarketCapMessage<'a> {
    pub ticker: &'a Ticker,
    pub market_cap: u64,
    pub exchange: Exchange,
    pub timestamp: &'a str,
}

#[derive(Debug, Serialize)]
pub struct TopListEntry<'a> {
    pub ticker: &'a Ticker,
    pub market_cap: u64,
}

#[derive(Debug, Serialize)]
pub struct SummaryMessage<'a> {
    pub exchange: Exchange,
    pub timestamp: &'a str,
    pub top_list: Vec<TopListEntry<'a>>,
}

/// Outcome of publishing one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub topic: String,
    /// Per-record outcomes in snapshot order, then the summary outcome
    pub outcomes: Vec<Option<MessageId>>,
}

impl PublishReport {
    pub fn published(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.published()
    }

    pub fn summary_outcome(&self) -> Option<&MessageId> {
        self.outcomes.last().and_then(Option::as_ref)
    }
}

pub struct SnapshotPublisher {
    bus: Arc<dyn MessageBus>,
    publish_timeout: Duration,
    top_n: usize,
}

impl SnapshotPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, publish_timeout: Duration, top_n: usize) -> Self {
        Self {
            bus,
            publish_timeout,
            top_n,
        }
    }

    pub async fn publish(&self, snapshot: &RankedSnapshot) -> PublishReport {
        let topic = RoutingKeyBuilder::market_cap(snapshot.exchange, self.top_n);
        let timestamp = snapshot.timestamp();

        let mut pending: Vec<(String, Result<PublishHandle, BusError>)> =
            Vec::with_capacity(snapshot.len() + 1);

        for record in &snapshot.records {
            let body = MarketCapMessage {
                ticker: &record.ticker,
                market_cap: record.market_cap,
                exchange: snapshot.exchange,
                timestamp: &timestamp,
            };
            let handle = OutboundMessage::json(&topic, &body).map(|message| {
                self.bus.publish(
                    message
                        .with_header("origin", ORIGIN)
                        .with_header("type", "record"),
                )
            });
            pending.push((record.ticker.to_string(), handle));
        }

        let summary = SummaryMessage {
            exchange: snapshot.exchange,
            timestamp: &timestamp,
            top_list: snapshot
                .records
                .iter()
                .map(|r| TopListEntry {
                    ticker: &r.ticker,
                    market_cap: r.market_cap,
                })
                .collect(),
        };
        let handle = OutboundMessage::json(&topic, &summary).map(|message| {
            self.bus.publish(
                message
                    .with_header("origin", ORIGIN)
                    .with_header("type", "summary"),
            )
        });
        pending.push(("summary".to_string(), handle));

        let timeout = self.publish_timeout;
        let outcomes = join_all(pending.into_iter().map(|(label, handle)| async move {
            let result = match handle {
                Ok(handle) => handle.wait(timeout).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!("Failed to publish {} message: {}", label, e);
                    None
                }
            }
        }))
        .await;

        let report = PublishReport { topic, outcomes };
        tracing::info!(
            "{}: published {}/{} messages to {}",
            snapshot.exchange,
            report.published(),
            report.outcomes.len(),
            report.topic
        );
        report
    }
}
