use std::sync::Arc;
use std::time::{Duration, Instant};

use super::aggregator::RankAggregator;
use super::fetcher::BoundedFetcher;
use super::publisher::{PublishReport, SnapshotPublisher};
use super::source::MarketCapSource;
use crate::bus::MessageBus;
use crate::config::RankingConfig;
use crate::error::PipelineError;
use crate::models::{Exchange, RankedSnapshot};

/// Tickers echoed to the log after each exchange
const LOG_TOP: usize = 5;

/// Result of ranking one exchange
#[derive(Debug, Clone)]
pub struct ExchangeRun {
    pub exchange: Exchange,
    pub listed: usize,
    pub degraded: usize,
    pub snapshot: RankedSnapshot,
    pub publish: PublishReport,
    pub elapsed: Duration,
}

/// Enumerate → fetch → rank → publish, one exchange at a time
pub struct RankingPipeline {
    source: Arc<dyn MarketCapSource>,
    fetcher: BoundedFetcher,
    aggregator: RankAggregator,
    publisher: SnapshotPublisher,
    max_tickers: usize,
    exchanges: Vec<Exchange>,
}

impl RankingPipeline {
    pub fn new(
        source: Arc<dyn MarketCapSource>,
        bus: Arc<dyn MessageBus>,
        config: &RankingConfig,
    ) -> Self {
        Self {
            fetcher: BoundedFetcher::new(Arc::clone(&source), config.fetcher_config()),
            aggregator: RankAggregator::new(config.top_n),
            publisher: SnapshotPublisher::new(bus, config.publish_timeout(), config.top_n),
            source,
            max_tickers: config.max_tickers,
            exchanges: config.exchanges.clone(),
        }
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Rank every configured exchange in order
    ///
    /// Stops at the first exchange whose ticker listing fails.
    pub async fn run(&self) -> Result<Vec<ExchangeRun>, PipelineError> {
        let mut runs = Vec::with_capacity(self.exchanges.len());
        for exchange in &self.exchanges {
            runs.push(self.process_exchange(*exchange).await?);
        }
        Ok(runs)
    }

    pub async fn process_exchange(&self, exchange: Exchange) -> Result<ExchangeRun, PipelineError> {
        let started = Instant::now();
        tracing::info!("📈 Ranking {} (max {} tickers)", exchange, self.max_tickers);

        let tickers = self
            .source
            .list_tickers(exchange, true, self.max_tickers)
            .await
            .map_err(|e| {
                tracing::error!("❌ {}: ticker listing failed: {}", exchange, e);
                e
            })?;
        let listed = tickers.len();

        let fetched = self.fetcher.fetch_all(tickers).await;
        if fetched.degraded > 0 {
            tracing::warn!(
                "⚠️  {}: {} of {} lookups degraded to 0",
                exchange,
                fetched.degraded,
                listed
            );
        }

        let snapshot = self.aggregator.aggregate(exchange, fetched.records);
        for (rank, record) in snapshot.records.iter().take(LOG_TOP).enumerate() {
            tracing::info!("   {}. {}: {}", rank + 1, record.ticker, record.market_cap);
        }

        let publish = self.publisher.publish(&snapshot).await;

        let run = ExchangeRun {
            exchange,
            listed,
            degraded: fetched.degraded,
            snapshot,
            publish,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "✅ {}: top {} of {} published in {:.1}s",
            exchange,
            run.snapshot.len(),
            listed,
            run.elapsed.as_secs_f64()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_cap::SourceError;
    use crate::test_support::{MockMarketCapSource, RecordingBus};

    fn config(top_n: usize, exchanges: Vec<Exchange>) -> RankingConfig {
        RankingConfig {
            top_n,
            exchanges,
            ..RankingConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tie_scenario_end_to_end() {
        let source = Arc::new(
            MockMarketCapSource::new()
                .with_listing(Exchange::Xnys, &["AAA", "BBB", "CCC"])
                .with_caps(&[("AAA", 10), ("BBB", 50), ("CCC", 50)]),
        );
        let bus = Arc::new(RecordingBus::new());
        let pipeline = RankingPipeline::new(source, bus.clone(), &config(2, vec![Exchange::Xnys]));

        let run = pipeline.process_exchange(Exchange::Xnys).await.unwrap();

        let ranked: Vec<_> = run
            .snapshot
            .records
            .iter()
            .map(|r| (r.ticker.as_str(), r.market_cap))
            .collect();
        assert_eq!(ranked, vec![("BBB", 50), ("CCC", 50)]);
        assert_eq!(run.listed, 3);
        assert_eq!(run.publish.outcomes.len(), 3);
        assert!(bus.topics().iter().all(|t| t == "xnys-top2-tickers-marketcap"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_still_completes() {
        let source = Arc::new(
            MockMarketCapSource::new()
                .with_listing(Exchange::Xnas, &["AAA", "ZZZ"])
                .with_cap("AAA", 5)
                .with_failure("ZZZ", SourceError::Timeout)
                .with_failure("ZZZ", SourceError::Timeout),
        );
        let bus = Arc::new(RecordingBus::new());
        let pipeline = RankingPipeline::new(source, bus.clone(), &config(150, vec![Exchange::Xnas]));

        let run = pipeline.process_exchange(Exchange::Xnas).await.unwrap();

        assert_eq!(run.degraded, 1);
        let zzz = run
            .snapshot
            .records
            .iter()
            .find(|r| r.ticker.as_str() == "ZZZ")
            .unwrap();
        assert_eq!(zzz.market_cap, 0);
        assert_eq!(bus.bodies()[1]["market_cap"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_processes_exchanges_in_order() {
        let source = Arc::new(
            MockMarketCapSource::new()
                .with_listing(Exchange::Xnas, &["N1"])
                .with_listing(Exchange::Xase, &["A1", "A2"]),
        );
        let bus = Arc::new(RecordingBus::new());
        let pipeline = RankingPipeline::new(
            source,
            bus.clone(),
            &config(150, vec![Exchange::Xase, Exchange::Xnas]),
        );

        let runs = pipeline.run().await.unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].exchange, Exchange::Xase);
        assert_eq!(runs[1].exchange, Exchange::Xnas);
        let topics = bus.topics();
        assert_eq!(topics.first().unwrap(), "xase-top150-tickers-marketcap");
        assert_eq!(topics.last().unwrap(), "xnas-top150-tickers-marketcap");
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let source = Arc::new(
            MockMarketCapSource::new().with_list_error(SourceError::Http {
                status: 401,
                message: "unauthorized".into(),
            }),
        );
        let bus = Arc::new(RecordingBus::new());
        let pipeline = RankingPipeline::new(source, bus.clone(), &RankingConfig::default());

        let result = pipeline.run().await;

        assert!(matches!(result, Err(PipelineError::Source(SourceError::Http { status: 401, .. }))));
        assert!(bus.messages().is_empty());
    }
}
