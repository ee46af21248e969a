//! Mock collaborators shared by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::bus::{BusError, MessageBus, OutboundMessage, PublishHandle};
use crate::database::{DatabaseError, TickerWarehouse};
use crate::market_cap::{MarketCapSource, SourceError};
use crate::models::{Exchange, Ticker};

pub fn tickers(symbols: &[&str]) -> Vec<Ticker> {
    symbols.iter().map(|s| Ticker::new(*s).unwrap()).collect()
}

/// Scripted market-cap source
///
/// Failures queued for a ticker are returned one per call before the
/// configured cap is served.
#[derive(Default)]
pub struct MockMarketCapSource {
    listings: HashMap<Exchange, Vec<Ticker>>,
    list_error: Option<SourceError>,
    caps: HashMap<String, u64>,
    failures: Mutex<HashMap<String, VecDeque<SourceError>>>,
    panic_on: HashSet<String>,
    latency: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockMarketCapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, exchange: Exchange, symbols: &[&str]) -> Self {
        self.listings.insert(exchange, tickers(symbols));
        self
    }

    pub fn with_list_error(mut self, error: SourceError) -> Self {
        self.list_error = Some(error);
        self
    }

    pub fn with_cap(mut self, symbol: &str, cap: u64) -> Self {
        self.caps.insert(symbol.to_string(), cap);
        self
    }

    pub fn with_caps(mut self, caps: &[(&str, u64)]) -> Self {
        for (symbol, cap) in caps {
            self.caps.insert(symbol.to_string(), *cap);
        }
        self
    }

    pub fn with_failure(self, symbol: &str, error: SourceError) -> Self {
        self.failures
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .push_back(error);
        self
    }

    pub fn with_panic(mut self, symbol: &str) -> Self {
        self.panic_on.insert(symbol.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().get(symbol).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketCapSource for MockMarketCapSource {
    async fn list_tickers(
        &self,
        exchange: Exchange,
        _active_only: bool,
        cap: usize,
    ) -> Result<Vec<Ticker>, SourceError> {
        if let Some(error) = &self.list_error {
            return Err(error.clone());
        }
        let mut listed = self.listings.get(&exchange).cloned().unwrap_or_default();
        listed.truncate(cap);
        Ok(listed)
    }

    async fn get_market_cap(&self, ticker: &Ticker) -> Result<u64, SourceError> {
        *self.calls.lock().entry(ticker.to_string()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on.contains(ticker.as_str()) {
            panic!("lookup for {} blew up", ticker);
        }

        let failure = self
            .failures
            .lock()
            .get_mut(ticker.as_str())
            .and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error),
            None => Ok(self.caps.get(ticker.as_str()).copied().unwrap_or(0)),
        }
    }
}

/// Bus that records every message and resolves handles from a script
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<OutboundMessage>>,
    hang_types: HashSet<String>,
    fail_topics: HashSet<String>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for messages with this `type` header never resolve
    pub fn hang_on_type(mut self, message_type: &str) -> Self {
        self.hang_types.insert(message_type.to_string());
        self
    }

    /// Handles for messages on this topic resolve to an error
    pub fn fail_on_topic(mut self, topic: &str) -> Self {
        self.fail_topics.insert(topic.to_string());
        self
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.topic.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }
}

impl MessageBus for RecordingBus {
    fn publish(&self, message: OutboundMessage) -> PublishHandle {
        let hang = message
            .header("type")
            .map_or(false, |t| self.hang_types.contains(t));
        let fail = self.fail_topics.contains(&message.topic);

        let id = {
            let mut messages = self.messages.lock();
            messages.push(message);
            format!("msg-{}", messages.len())
        };

        if hang {
            PublishHandle::new(futures::future::pending())
        } else if fail {
            PublishHandle::ready(Err(BusError::PublishFailed("scripted failure".into())))
        } else {
            PublishHandle::ready(Ok(id))
        }
    }
}

/// In-memory warehouse with a failure switch
#[derive(Default)]
pub struct MockWarehouse {
    tables: Mutex<HashMap<Exchange, HashSet<Ticker>>>,
    failing: AtomicBool,
    queries: AtomicUsize,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tickers(self, exchange: Exchange, symbols: &[&str]) -> Self {
        self.set_tickers(exchange, symbols);
        self
    }

    pub fn set_tickers(&self, exchange: Exchange, symbols: &[&str]) {
        self.tables
            .lock()
            .insert(exchange, tickers(symbols).into_iter().collect());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl TickerWarehouse for MockWarehouse {
    fn query_distinct_tickers(&self, exchange: Exchange) -> Result<HashSet<Ticker>, DatabaseError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionFailed("warehouse unavailable".into()));
        }
        Ok(self.tables.lock().get(&exchange).cloned().unwrap_or_default())
    }
}
