use marketcap_router::config::{AppConfig, ConfigError};
use marketcap_router::database::{establish_warehouse_pool, TickerWarehouseImpl};
use marketcap_router::error::PipelineError;
use marketcap_router::jobs::RankingJob;
use marketcap_router::market_cap::{MarketCapSource, PolygonClient, RankingPipeline};
use marketcap_router::membership::{MembershipBuilder, MembershipStore, RefreshScheduler};
use marketcap_router::rabbitmq::RabbitMQPublisher;
use marketcap_router::stream::{FeedConfig, PolygonFeedClient, StreamRouter};
use marketcap_router::{create_router, OpsState};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Rank every configured exchange once and exit
    Rank,
    /// Rank on the cron schedule until Ctrl-C
    Schedule,
    /// Route the push-feed and serve the ops API
    Stream,
}

impl Mode {
    fn parse(arg: Option<&str>) -> Result<Self, ConfigError> {
        match arg {
            None | Some("rank") => Ok(Mode::Rank),
            Some("schedule") => Ok(Mode::Schedule),
            Some("stream") => Ok(Mode::Stream),
            Some(other) => Err(ConfigError::Invalid {
                key: "mode".to_string(),
                value: other.to_string(),
                reason: "expected one of rank, schedule, stream".to_string(),
            }),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketcap_router=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("❌ {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), PipelineError> {
    let mode = Mode::parse(std::env::args().nth(1).as_deref())?;
    let config = AppConfig::from_env()?;

    tracing::info!("🚀 marketcap-router starting in {:?} mode", mode);

    match mode {
        Mode::Rank => run_ranking(&config).await,
        Mode::Schedule => run_scheduler(&config).await,
        Mode::Stream => run_streaming(&config).await,
    }
}

/// Connect the publisher, logging the exchange it publishes to
async fn connect_publisher(config: &AppConfig) -> Result<Arc<RabbitMQPublisher>, PipelineError> {
    let publisher = Arc::new(RabbitMQPublisher::new(config.rabbitmq.clone()));
    publisher.connect().await?;

    tracing::info!("🐰 RabbitMQ: Connected");
    tracing::info!("   Exchange: {}", config.rabbitmq.exchange);
    tracing::info!("   Type: {}", config.rabbitmq.exchange_type);

    Ok(publisher)
}

/// Keep the publisher connected in the background until `cancel` fires
fn supervise_publisher(
    publisher: &Arc<RabbitMQPublisher>,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let publisher = Arc::clone(publisher);
    let cancel = cancel.clone();
    tokio::spawn(async move { publisher.maintain_connection(cancel).await })
}

fn build_pipeline(
    config: &AppConfig,
    publisher: Arc<RabbitMQPublisher>,
) -> Result<RankingPipeline, PipelineError> {
    let source: Arc<dyn MarketCapSource> = Arc::new(PolygonClient::new(&config.polygon)?);
    Ok(RankingPipeline::new(source, publisher, &config.ranking))
}

async fn run_ranking(config: &AppConfig) -> Result<(), PipelineError> {
    let publisher = connect_publisher(config).await?;
    let pipeline = build_pipeline(config, Arc::clone(&publisher))?;

    let result = pipeline.run().await;
    publisher.disconnect().await;

    let runs = result?;
    for run in &runs {
        tracing::info!(
            "✅ {}: {} listed, {} degraded, {} published to {} in {:?}",
            run.exchange,
            run.listed,
            run.degraded,
            run.publish.published(),
            run.publish.topic,
            run.elapsed
        );
    }

    Ok(())
}

async fn run_scheduler(config: &AppConfig) -> Result<(), PipelineError> {
    let publisher = connect_publisher(config).await?;
    let pipeline = Arc::new(build_pipeline(config, Arc::clone(&publisher))?);
    let cancel = CancellationToken::new();
    let supervisor = supervise_publisher(&publisher, &cancel);

    tracing::info!("⏰ Initializing cron scheduler...");
    let mut scheduler = JobScheduler::new().await?;
    RankingJob::new(pipeline, config.ranking_cron.clone())
        .register(&scheduler)
        .await?;
    scheduler.start().await?;

    tracing::info!("✅ Cron scheduler started (schedule: {})", config.ranking_cron);

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown requested");

    scheduler.shutdown().await?;
    cancel.cancel();
    let _ = supervisor.await;
    publisher.disconnect().await;

    Ok(())
}

async fn run_streaming(config: &AppConfig) -> Result<(), PipelineError> {
    let database_url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))?;

    tracing::info!("🗄️  Initializing warehouse connection...");
    let pool = establish_warehouse_pool(database_url, config.database.pool_size)?;
    let warehouse = Arc::new(TickerWarehouseImpl::new(
        move || pool.get_conn(),
        config.membership.tables.clone(),
    ));

    let priority = config.membership.priority.clone();
    let store = Arc::new(MembershipStore::new(priority.clone()));
    let builder = MembershipBuilder::new(warehouse, priority, Arc::clone(&store));

    // Routing without a first generation would drop everything
    builder.rebuild().await?;

    let publisher = connect_publisher(config).await?;
    let router = Arc::new(StreamRouter::new(
        Arc::clone(&store),
        publisher.clone(),
        config.ranking.publish_timeout(),
    ));

    let cancel = CancellationToken::new();
    let supervisor = supervise_publisher(&publisher, &cancel);

    let refresher = RefreshScheduler::new(
        builder.clone(),
        config.membership.refresh_interval(),
        config.membership.check_interval(),
    );
    let refresh_handle = tokio::spawn(refresher.run(cancel.clone()));

    let (tx, rx) = mpsc::channel(config.stream.channel_capacity);
    let feed = PolygonFeedClient::new(
        FeedConfig::new(&config.stream, config.polygon.api_key.clone()),
        tx,
        cancel.clone(),
    );
    let feed_cancel = cancel.clone();
    let feed_handle = tokio::spawn(async move {
        let result = feed.run().await;
        if let Err(e) = &result {
            tracing::error!("❌ Feed stopped: {}", e);
        }
        // Nothing left to route once the feed gives up
        feed_cancel.cancel();
        result
    });

    let router_task = Arc::clone(&router);
    let router_cancel = cancel.clone();
    let router_handle = tokio::spawn(async move { router_task.run(rx, router_cancel).await });

    let app = create_router(
        OpsState {
            store,
            router,
            publisher: Some(Arc::clone(&publisher)),
            started_at: Instant::now(),
        },
        Some(builder),
    );

    let listener = tokio::net::TcpListener::bind(&config.api_addr).await?;

    tracing::info!("🚀 Ops API running on http://{}", config.api_addr);
    tracing::info!("📊 Health check: http://{}/api/v1/health", config.api_addr);
    tracing::info!("📚 OpenAPI: http://{}/api-docs/openapi.json", config.api_addr);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Shutdown requested");
        }
        shutdown.cancel();
    });

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_cancel.cancelled().await })
        .await?;

    let _ = router_handle.await;
    let _ = refresh_handle.await;
    let _ = supervisor.await;
    let feed_result = feed_handle.await;

    publisher.disconnect().await;
    tracing::info!("👋 Stopped");

    match feed_result {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Ok(()),
    }
}
