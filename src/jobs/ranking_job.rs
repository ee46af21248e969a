use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::error::PipelineError;
use crate::market_cap::{ExchangeRun, RankingPipeline};

/// Market-cap ranking job
///
/// Runs the full ranking pipeline for every configured exchange on a cron
/// schedule (default: weekdays after the close).
pub struct RankingJob {
    pipeline: Arc<RankingPipeline>,
    schedule: String,
}

impl RankingJob {
    pub fn new(pipeline: Arc<RankingPipeline>, schedule: impl Into<String>) -> Self {
        Self {
            pipeline,
            schedule: schedule.into(),
        }
    }

    /// Run every exchange once, logging instead of propagating failures
    async fn rank_all(pipeline: &RankingPipeline) -> Option<Vec<ExchangeRun>> {
        tracing::info!("Starting market-cap ranking job");

        match pipeline.run().await {
            Ok(runs) => {
                let published: usize = runs.iter().map(|r| r.publish.published()).sum();
                tracing::info!(
                    "Ranking job completed: {} exchanges, {} messages published",
                    runs.len(),
                    published
                );
                Some(runs)
            }
            Err(e) => {
                tracing::error!("Ranking job failed: {}", e);
                None
            }
        }
    }

    /// Register this job with the scheduler
    pub async fn register(self, scheduler: &JobScheduler) -> Result<(), JobSchedulerError> {
        let pipeline = Arc::clone(&self.pipeline);

        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _lock| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                Self::rank_all(&pipeline).await;
            })
        })?;

        scheduler.add(job).await?;

        tracing::info!("Ranking job registered (schedule: {})", self.schedule);

        Ok(())
    }

    /// Run the ranking immediately (manual trigger)
    pub async fn run_now(&self) -> Result<Vec<ExchangeRun>, PipelineError> {
        self.pipeline.run().await
    }
}
