/// Batch ranking pipeline
///
/// - `source`: port to the upstream reference-data service
/// - `polygon`: HTTP implementation of that port
/// - `fetcher`: bounded-parallelism lookups with retry
/// - `aggregator`: top-N ranking
/// - `publisher`: fan-out of a snapshot onto the bus
/// - `pipeline`: composition of the above per exchange

pub mod aggregator;
pub mod fetcher;
pub mod pipeline;
pub mod polygon;
pub mod publisher;
pub mod source;

pub use aggregator::RankAggregator;
pub use fetcher::{BoundedFetcher, FetchProgress, FetchReport, FetcherConfig, LookupOutcome};
pub use pipeline::{ExchangeRun, RankingPipeline};
pub use polygon::PolygonClient;
pub use publisher::{PublishReport, SnapshotPublisher};
pub use source::{MarketCapSource, SourceError};
