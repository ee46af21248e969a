use chrono::{DateTime, Utc};

use crate::models::{Exchange, MarketCapRecord, RankedSnapshot};

/// Reduces fetched records to a top-N ranking
#[derive(Debug, Clone, Copy)]
pub struct RankAggregator {
    top_n: usize,
}

impl RankAggregator {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn aggregate(&self, exchange: Exchange, records: Vec<MarketCapRecord>) -> RankedSnapshot {
        self.aggregate_at(exchange, records, Utc::now())
    }

    /// Sort descending by market cap and keep the first N
    ///
    /// The sort is stable, so tied records keep their input order.
    pub fn aggregate_at(
        &self,
        exchange: Exchange,
        mut records: Vec<MarketCapRecord>,
        captured_at: DateTime<Utc>,
    ) -> RankedSnapshot {
        records.sort_by(|a, b| b.market_cap.cmp(&a.market_cap));
        records.truncate(self.top_n);

        RankedSnapshot {
            exchange,
            captured_at,
            records,
        }
    }
}
