//! Fantasy league ingestion service.
//!
//! Syncs leagues from the provider API into PostgreSQL on a polling loop,
//! publishes run summaries to a Redis stream and serves cached reads.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use fantasy_ingestion::client::transport::ReqwestTransport;
use fantasy_ingestion::config::Config;
use fantasy_ingestion::events::SyncPublisher;
use fantasy_ingestion::health::{self, AppState, HealthState};
use fantasy_ingestion::store::{PostgresStore, Store};
use fantasy_ingestion::sync::SyncSummary;
use fantasy_ingestion::{
    AnalyticsReader, ApiClient, BatchPersistence, SyncOptions, SyncOrchestrator,
};

/// How often expired cache entries are dropped.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

struct IngestionService {
    config: Config,
    orchestrator: SyncOrchestrator,
    reader: Arc<AnalyticsReader>,
    publisher: Option<SyncPublisher>,
    health: HealthState,
}

impl IngestionService {
    async fn new(config: Config) -> Result<Self> {
        let store = PostgresStore::connect(&config.database_url, 5).await?;
        store.ensure_schema().await?;
        let store: Arc<dyn Store> = Arc::new(store);

        let transport = Arc::new(ReqwestTransport::new()?);
        let client = ApiClient::new(config.api.clone(), transport);
        client
            .initialize()
            .await
            .context("Initial token exchange failed")?;

        let publisher = match &config.redis_url {
            Some(url) => Some(SyncPublisher::connect(url, 5).await?),
            None => {
                info!("REDIS_URL not set; sync summaries will not be published");
                None
            }
        };

        let reader = Arc::new(AnalyticsReader::new(Arc::clone(&store), config.cache_ttl));
        let orchestrator = SyncOrchestrator::new(
            Arc::new(client),
            Arc::clone(&store),
            BatchPersistence::new(store, config.batch_policy.clone()),
            config.sync.clone(),
        )
        .with_reader(Arc::clone(&reader));

        Ok(Self {
            config,
            orchestrator,
            reader,
            publisher,
            health: HealthState::new(),
        })
    }

    /// Single sync run
    async fn sync_once(&self) -> SyncSummary {
        let summary = self.orchestrator.sync(SyncOptions::default()).await;
        self.health.record_run(&summary).await;

        if !summary.is_clean() {
            warn!(
                run_id = %summary.run_id,
                "Sync run had {} failures", summary.failures
            );
        }

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&summary).await {
                error!("Failed to publish sync summary: {:?}", e);
            }
        }
        summary
    }

    /// Main polling loop
    async fn run(&self) -> Result<()> {
        info!(
            "Starting sync loop (poll interval: {}s)",
            self.config.poll_interval_seconds
        );

        // Periodic cache sweep; expired entries stay one extra TTL as stale fallbacks.
        let reader = Arc::clone(&self.reader);
        let retain = self.config.cache_ttl;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CACHE_SWEEP_INTERVAL).await;
                let purged = reader.purge_expired(retain);
                if purged > 0 {
                    info!("Cache sweep dropped {} entries", purged);
                }
            }
        });

        loop {
            let start = std::time::Instant::now();
            let summary = self.sync_once().await;
            info!(
                "Sync completed: {} leagues ({} skipped, {} failed) in {:?}",
                summary.leagues_processed,
                summary.leagues_skipped,
                summary.failures,
                start.elapsed()
            );

            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A local .env is optional; deployed containers use env vars and secret files.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fantasy_ingestion=info".parse()?),
        )
        .init();

    info!("Fantasy ingestion service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let health_port = config.health_port;
    let run_once = config.run_once;

    let service = IngestionService::new(config).await?;
    let app = health::router(AppState {
        health: service.health.clone(),
        reader: Arc::clone(&service.reader),
    });

    let health_addr = format!("0.0.0.0:{}", health_port);
    info!("Health endpoint listening on {}", health_addr);

    let listener = tokio::net::TcpListener::bind(&health_addr).await?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server stopped: {:?}", e);
        }
    });

    if run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        let summary = service.sync_once().await;
        info!(
            "One-shot sync completed: {} leagues, {} matchups, {} failed",
            summary.leagues_processed,
            summary.matchups_processed,
            summary.failures
        );
        return Ok(());
    }

    // Handle shutdown gracefully (continuous mode)
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                error!("Service error: {:?}", e);
            }
        }
        _ = ctrl_c => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
