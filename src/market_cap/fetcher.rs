//! Bounded-parallelism market-cap lookups
//!
//! A fixed pool of workers drains a shared cursor over the ticker list.
//! Every ticker gets exactly one slot in the output; a lookup that never
//! produced a usable value is recorded with a market cap of 0.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::source::MarketCapSource;
use crate::models::{MarketCapRecord, Ticker};

/// Progress is logged once per this many completed lookups
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Number of concurrent workers (W)
    pub workers: usize,
    /// Pause a worker takes after each lookup
    pub inter_request_delay: Duration,
    /// Wait before the single retry of a transient failure
    pub retry_backoff: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            inter_request_delay: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Result of looking up a single ticker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Fetched(u64),
    Degraded { reason: String, attempts: u32 },
}

impl LookupOutcome {
    pub fn market_cap(&self) -> u64 {
        match self {
            LookupOutcome::Fetched(cap) => *cap,
            LookupOutcome::Degraded { .. } => 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LookupOutcome::Degraded { .. })
    }
}

/// Live counters for the fetch in progress
#[derive(Debug, Default)]
pub struct FetchProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    degraded: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub degraded: usize,
}

impl FetchProgress {
    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.degraded.store(0, Ordering::Relaxed);
    }

    fn record(&self, outcome: &LookupOutcome) -> usize {
        if outcome.is_degraded() {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> FetchProgressSnapshot {
        FetchProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Output of one `fetch_all` call
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// One record per input ticker, in input order
    pub records: Vec<MarketCapRecord>,
    /// Records whose lookup failed or never finished
    pub degraded: usize,
    pub elapsed: Duration,
}

pub struct BoundedFetcher {
    source: Arc<dyn MarketCapSource>,
    config: FetcherConfig,
    progress: Arc<FetchProgress>,
}

impl BoundedFetcher {
    pub fn new(source: Arc<dyn MarketCapSource>, config: FetcherConfig) -> Self {
        Self {
            source,
            config,
            progress: Arc::new(FetchProgress::default()),
        }
    }

    pub fn progress(&self) -> Arc<FetchProgress> {
        Arc::clone(&self.progress)
    }

    /// Look up every ticker with at most `workers` lookups in flight
    pub async fn fetch_all(&self, tickers: Vec<Ticker>) -> FetchReport {
        let started = Instant::now();
        let total = tickers.len();
        self.progress.reset(total);

        if total == 0 {
            return FetchReport {
                records: Vec::new(),
                degraded: 0,
                elapsed: started.elapsed(),
            };
        }

        let tickers = Arc::new(tickers);
        let cursor = Arc::new(AtomicUsize::new(0));
        let slots: Arc<Mutex<Vec<Option<LookupOutcome>>>> = Arc::new(Mutex::new(vec![None; total]));
        let workers = self.config.workers.clamp(1, total);

        tracing::debug!("Fetching {} market caps with {} workers", total, workers);

        let handles = (0..workers).map(|_| {
            let worker = Worker {
                source: Arc::clone(&self.source),
                tickers: Arc::clone(&tickers),
                cursor: Arc::clone(&cursor),
                slots: Arc::clone(&slots),
                progress: Arc::clone(&self.progress),
                config: self.config.clone(),
            };
            tokio::spawn(worker.run())
        });

        for (id, result) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = result {
                tracing::error!("Fetch worker {} aborted: {}", id, e);
            }
        }

        let outcomes = std::mem::take(&mut *slots.lock());
        let mut degraded = 0;
        let records = tickers
            .iter()
            .zip(outcomes)
            .map(|(ticker, outcome)| match outcome {
                Some(LookupOutcome::Fetched(cap)) => MarketCapRecord::new(ticker.clone(), cap),
                Some(LookupOutcome::Degraded { .. }) => {
                    degraded += 1;
                    MarketCapRecord::degraded(ticker.clone())
                }
                None => {
                    tracing::warn!("{}: lookup never completed, recording 0", ticker);
                    degraded += 1;
                    MarketCapRecord::degraded(ticker.clone())
                }
            })
            .collect();

        FetchReport {
            records,
            degraded,
            elapsed: started.elapsed(),
        }
    }
}

struct Worker {
    source: Arc<dyn MarketCapSource>,
    tickers: Arc<Vec<Ticker>>,
    cursor: Arc<AtomicUsize>,
    slots: Arc<Mutex<Vec<Option<LookupOutcome>>>>,
    progress: Arc<FetchProgress>,
    config: FetcherConfig,
}

impl Worker {
    async fn run(self) {
        loop {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(ticker) = self.tickers.get(index) else {
                break;
            };

            let outcome = lookup(self.source.as_ref(), ticker, self.config.retry_backoff).await;
            let completed = self.progress.record(&outcome);
            self.slots.lock()[index] = Some(outcome);

            if completed % PROGRESS_EVERY == 0 {
                tracing::debug!("Progress: {}/{} tickers processed", completed, self.tickers.len());
            }

            if self.cursor.load(Ordering::SeqCst) < self.tickers.len() {
                tokio::time::sleep(self.config.inter_request_delay).await;
            }
        }
    }
}

/// One lookup with a single retry for transient failures
async fn lookup(source: &dyn MarketCapSource, ticker: &Ticker, backoff: Duration) -> LookupOutcome {
    match source.get_market_cap(ticker).await {
        Ok(cap) => LookupOutcome::Fetched(cap),
        Err(e) if e.is_transient() => {
            tracing::warn!("{}: {}, retrying in {:?}", ticker, e, backoff);
            tokio::time::sleep(backoff).await;
            match source.get_market_cap(ticker).await {
                Ok(cap) => LookupOutcome::Fetched(cap),
                Err(e) => {
                    tracing::warn!("{}: retry failed ({}), recording 0", ticker, e);
                    LookupOutcome::Degraded {
                        reason: e.to_string(),
                        attempts: 2,
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!("{}: {}, recording 0", ticker, e);
            LookupOutcome::Degraded {
                reason: e.to_string(),
                attempts: 1,
            }
        }
    }
}
