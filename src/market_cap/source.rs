use async_trait::async_trait;

use crate::models::{Exchange, Ticker};

/// Errors returned by a market-cap source
///
/// `is_transient` decides whether a lookup is worth one more attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Source not configured: {0}")]
    Config(String),
}

impl SourceError {
    /// Network-class failures: connection errors, timeouts, throttling and
    /// server-side errors
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout => true,
            SourceError::Http { status, .. } => *status == 429 || *status >= 500,
            SourceError::Malformed(_) | SourceError::Config(_) => false,
        }
    }
}

/// Upstream reference-data service
#[async_trait]
pub trait MarketCapSource: Send + Sync {
    /// Enumerate common-stock tickers listed on `exchange`, at most `cap`
    ///
    /// Each call restarts the enumeration from the first page.
    async fn list_tickers(
        &self,
        exchange: Exchange,
        active_only: bool,
        cap: usize,
    ) -> Result<Vec<Ticker>, SourceError>;

    /// Market capitalization of one ticker (0 when the source has no value)
    async fn get_market_cap(&self, ticker: &Ticker) -> Result<u64, SourceError>;
}
