use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::store::{MembershipSet, MembershipStore, MembershipSummary};
use crate::database::{DatabaseError, TickerWarehouse};
use crate::models::Exchange;

/// Builds a complete membership set from the warehouse and installs it
///
/// Shared by the refresh loop and the manual refresh endpoint.
#[derive(Clone)]
pub struct MembershipBuilder {
    warehouse: Arc<dyn TickerWarehouse>,
    priority: Vec<Exchange>,
    store: Arc<MembershipStore>,
}

impl MembershipBuilder {
    pub fn new(
        warehouse: Arc<dyn TickerWarehouse>,
        priority: Vec<Exchange>,
        store: Arc<MembershipStore>,
    ) -> Self {
        Self {
            warehouse,
            priority,
            store,
        }
    }

    pub fn store(&self) -> &Arc<MembershipStore> {
        &self.store
    }

    /// Query every exchange, then install the result in one swap
    ///
    /// Nothing is installed unless every query succeeds.
    pub async fn rebuild(&self) -> Result<MembershipSummary, DatabaseError> {
        let warehouse = Arc::clone(&self.warehouse);
        let priority = self.priority.clone();

        let members = tokio::task::spawn_blocking(move || {
            let mut members = HashMap::with_capacity(priority.len());
            for exchange in priority {
                let tickers = warehouse.query_distinct_tickers(exchange)?;
                tracing::debug!("{}: {} tickers loaded from warehouse", exchange, tickers.len());
                members.insert(exchange, tickers);
            }
            Ok::<_, DatabaseError>(members)
        })
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Warehouse task failed: {}", e)))??;

        let set = MembershipSet::new(self.priority.clone(), members);
        let mut summary = set.summary();
        summary.generation = self.store.install(set);

        tracing::info!(
            "🔄 Membership generation {} installed ({} tickers)",
            summary.generation,
            summary.total
        );
        for entry in &summary.exchanges {
            tracing::info!("   {}: {} tickers", entry.exchange, entry.tickers);
        }

        Ok(summary)
    }
}

/// What one scheduler tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Installed set is younger than the staleness interval
    Fresh,
    /// A new generation was installed
    Refreshed(u64),
    /// Rebuild failed; the previous set stays installed
    Failed,
}

/// Background loop keeping the membership set fresh
pub struct RefreshScheduler {
    builder: MembershipBuilder,
    staleness: chrono::Duration,
    check_interval: Duration,
}

impl RefreshScheduler {
    pub fn new(builder: MembershipBuilder, staleness: Duration, check_interval: Duration) -> Self {
        Self {
            builder,
            staleness: chrono::Duration::seconds(staleness.as_secs() as i64),
            check_interval,
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Rebuild when the installed set was never built or is too old
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let current = self.builder.store().current();
        if !current.is_stale(now, self.staleness) {
            return TickOutcome::Fresh;
        }

        match self.builder.rebuild().await {
            Ok(summary) => TickOutcome::Refreshed(summary.generation),
            Err(e) => {
                tracing::warn!(
                    "⚠️  Membership refresh failed, keeping generation {}: {}",
                    current.generation(),
                    e
                );
                TickOutcome::Failed
            }
        }
    }

    /// Check on every interval tick until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "⏰ Membership refresh loop started (check every {:?})",
            self.check_interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick() => {
                    tracing::trace!("Membership check: {:?}", outcome);
                }
            }
        }

        tracing::info!("Membership refresh loop stopped");
    }
}
