//! Polygon-style reference API client (cold path)
//!
//! Ticker enumeration pages through `/v3/reference/tickers` following
//! `next_url`; market caps come from `/v3/reference/tickers/{ticker}`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::source::{MarketCapSource, SourceError};
use crate::config::PolygonConfig;
use crate::models::{Exchange, Ticker};

/// Page size requested from the ticker listing endpoint
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct TickersPage {
    #[serde(default)]
    results: Vec<TickerItem>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerItem {
    #[serde(default)]
    ticker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    #[serde(default)]
    results: Option<TickerDetails>,
    #[serde(default, alias = "marketCap")]
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TickerDetails {
    #[serde(default, alias = "marketCap")]
    market_cap: Option<f64>,
}

impl TickerDetailsResponse {
    /// Market cap from `results`, falling back to a top-level field
    fn market_cap(&self) -> u64 {
        let value = self
            .results
            .as_ref()
            .and_then(|r| r.market_cap)
            .or(self.market_cap);
        to_whole_units(value)
    }
}

fn to_whole_units(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.trunc() as u64,
        _ => 0,
    }
}

/// HTTP client for the reference API
pub struct PolygonClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    page_retries: u32,
    page_backoff: Duration,
}

impl PolygonClient {
    /// Build a client; fails when no API key is configured
    pub fn new(config: &PolygonConfig) -> Result<Self, SourceError> {
        if config.api_key.trim().is_empty() {
            return Err(SourceError::Config("POLYGON_API_KEY is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("marketcap-router/0.1")
            .build()
            .map_err(|e| SourceError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_retries: config.retries,
            page_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Fetch one listing page, retrying transient failures with doubling backoff
    async fn get_page(
        &self,
        request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<TickersPage, SourceError> {
        let mut backoff = self.page_backoff;
        let mut attempt = 0;
        loop {
            match self.get_json(request()).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.page_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Ticker page failed ({}), retry {}/{} in {:?}",
                        e,
                        attempt,
                        self.page_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = request
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

fn map_transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else if e.is_decode() {
        SourceError::Malformed(e.to_string())
    } else {
        SourceError::Network(e.to_string())
    }
}

#[async_trait]
impl MarketCapSource for PolygonClient {
    async fn list_tickers(
        &self,
        exchange: Exchange,
        active_only: bool,
        cap: usize,
    ) -> Result<Vec<Ticker>, SourceError> {
        let mut tickers = Vec::new();
        let limit = PAGE_LIMIT.to_string();
        let active = active_only.to_string();

        let url = format!("{}/v3/reference/tickers", self.base_url);
        let first = || {
            self.client.get(&url).query(&[
                ("type", "CS"),
                ("market", "stocks"),
                ("exchange", exchange.code()),
                ("active", active.as_str()),
                ("limit", limit.as_str()),
                ("sort", "ticker"),
            ])
        };
        let mut page = self.get_page(first).await?;

        loop {
            let TickersPage { results, next_url } = page;
            for item in results {
                if let Some(ticker) = item.ticker.and_then(|t| Ticker::new(t).ok()) {
                    tickers.push(ticker);
                }
                if tickers.len() >= cap {
                    break;
                }
            }

            if tickers.len() >= cap {
                break;
            }
            match next_url {
                Some(next_url) => page = self.get_page(|| self.client.get(&next_url)).await?,
                None => break,
            }
        }

        tickers.truncate(cap);
        tracing::info!(
            "{}: {} tickers loaded from reference API (max {})",
            exchange,
            tickers.len(),
            cap
        );
        Ok(tickers)
    }

    async fn get_market_cap(&self, ticker: &Ticker) -> Result<u64, SourceError> {
        let request = self
            .client
            .get(format!("{}/v3/reference/tickers/{}", self.base_url, ticker));
        let details: TickerDetailsResponse = self.get_json(request).await?;
        Ok(details.market_cap())
    }
}
