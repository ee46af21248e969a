use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ticker::{Exchange, Ticker};

/// Market capitalization of one ticker for one pipeline run
///
/// A `market_cap` of 0 means the lookup failed or the source had no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCapRecord {
    pub ticker: Ticker,
    pub market_cap: u64,
}

impl MarketCapRecord {
    pub fn new(ticker: Ticker, market_cap: u64) -> Self {
        Self { ticker, market_cap }
    }

    /// Record for a lookup that produced no usable value
    pub fn degraded(ticker: Ticker) -> Self {
        Self::new(ticker, 0)
    }
}

/// Top-N ranking for one exchange
///
/// Records are sorted by market cap descending and share a single capture
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedSnapshot {
    pub exchange: Exchange,
    pub captured_at: DateTime<Utc>,
    pub records: Vec<MarketCapRecord>,
}

impl RankedSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Capture timestamp in RFC3339, as written into published messages
    pub fn timestamp(&self) -> String {
        self.captured_at.to_rfc3339()
    }

    /// Records with a zero market cap
    pub fn zero_count(&self) -> usize {
        self.records.iter().filter(|r| r.market_cap == 0).count()
    }
}
