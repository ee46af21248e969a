use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::market_cap::SourceError;
use crate::rabbitmq::RabbitMQError;
use crate::stream::FeedError;

/// Errors that end a pipeline invocation
///
/// Per-ticker, per-message and per-publish failures are absorbed where they
/// happen and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Market-cap source error: {0}")]
    Source(#[from] SourceError),

    #[error("Message bus error: {0}")]
    Transport(#[from] RabbitMQError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Failures a later invocation may not hit again (network, throttling,
    /// an unreachable warehouse)
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Source(e) => e.is_transient(),
            PipelineError::Warehouse(e) => e.is_connectivity(),
            PipelineError::Feed(e) => e.is_retryable(),
            PipelineError::Transport(_)
            | PipelineError::Config(_)
            | PipelineError::Scheduler(_)
            | PipelineError::Io(_) => false,
        }
    }

    /// Check if this error is caused by bad configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Config(_) | PipelineError::Source(SourceError::Config(_))
        )
    }

    /// Process exit code for the binary
    pub fn exit_code(&self) -> i32 {
        if self.is_config_error() {
            2
        } else {
            1
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
