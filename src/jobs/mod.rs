/// Cron jobs and scheduled tasks module
///
/// Contains background jobs that run on a schedule:
/// - Market-cap ranking of every configured exchange

pub mod ranking_job;

pub use ranking_job::RankingJob;
