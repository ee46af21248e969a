// Library Crate Root
// lib.rs

// Batch side: rank tickers by market cap and publish the top N per exchange.
// Streaming side: route push-feed messages to the exchange whose top list holds the symbol.
pub mod api;
pub mod bus;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod market_cap;
pub mod membership;
pub mod models;
pub mod rabbitmq;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

// pub use = re-export at crate root
pub use api::{create_router, OpsState};
pub use config::AppConfig;
pub use error::PipelineError;
pub use market_cap::RankingPipeline;
pub use membership::{MembershipSet, MembershipStore};
pub use models::{Exchange, StreamMessage, Ticker};
pub use stream::StreamRouter;
