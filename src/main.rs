use anyhow::Context;
use red_alerts_listener::config::{AppConfig, PollMode, StoreBackend};
use red_alerts_listener::db::{
    self, DocumentStore, LocationsCollection, MemoryDocumentStore, ParsedAlertsCollection,
    PgDocumentStore, RawAlertsCollection,
};
use red_alerts_listener::feed::HttpAlertFeed;
use red_alerts_listener::geo::{GeoLocator, PhotonGeocoder, RetryPolicy};
use red_alerts_listener::processor::poll_loop::describe_session_ids;
use red_alerts_listener::processor::{
    BlockingPoller, EventEnricher, IngestionPipeline, PollController, SessionLedger, StopOutcome,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Red Alerts Listener ({:?} mode)...", config.poll.mode);

    let pipeline = Arc::new(build_pipeline(&config).await?);

    match config.poll.mode {
        PollMode::Once => {
            let report = pipeline
                .run_once()
                .await
                .context("fetching alerts failed")?;
            info!(
                "Fetched {} alert(s): {} new raw, {} new parsed, {} new location(s), {} failure(s)",
                report.fetched,
                report.raw_ids.len(),
                report.processed_ids.len(),
                report.location_ids.len(),
                report.failures
            );
        }
        PollMode::Worker => {
            let poller = BlockingPoller::spawn(pipeline.clone(), config.poll.interval)?;
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested, waiting for the current cycle to finish");
            tokio::task::spawn_blocking(move || poller.stop()).await?;
            let ids = pipeline.session_ids();
            info!("Session ids: {}", describe_session_ids(Some(&ids)));
        }
        PollMode::Task => {
            let controller = PollController::new(pipeline, config.poll.interval);
            controller.start().await;
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            let ids = controller.session_ids().await;
            if controller.stop().await == StopOutcome::NotRunning {
                warn!("Polling had already stopped");
            }
            info!("Session ids: {}", describe_session_ids(ids.as_deref()));
        }
    }

    Ok(())
}

/// Composition root: every component is built once from the resolved config.
async fn build_pipeline(config: &AppConfig) -> anyhow::Result<IngestionPipeline> {
    let store: Arc<dyn DocumentStore> = match config.store.backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&config.store.database_url, config.store.max_connections)
                .await
                .context("connecting to the document store")?;
            info!("Connected to database");
            Arc::new(PgDocumentStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, nothing will be persisted");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    let enricher = Arc::new(EventEnricher::new(config.poll.timezone));
    let geocoder = Arc::new(PhotonGeocoder::new(
        config.geo.geocoder_url.clone(),
        config.geo.timeout,
    )?);
    let locator = Arc::new(GeoLocator::new(geocoder, RetryPolicy::from(&config.geo)));

    let raw = RawAlertsCollection::open(store.clone(), &config.store.raw_alerts_collection).await?;
    let parsed = ParsedAlertsCollection::open(
        store.clone(),
        &config.store.parsed_alerts_collection,
        enricher,
    )
    .await?;
    let locations =
        LocationsCollection::open(store, &config.store.locations_collection, locator).await?;

    let feed = HttpAlertFeed::new(&config.feed)?;
    info!("Polling alerts from {}", feed.url());

    Ok(IngestionPipeline::new(
        Arc::new(feed),
        Arc::new(raw),
        Arc::new(parsed),
        Arc::new(locations),
        SessionLedger::with_capacity(config.poll.ledger_capacity),
    ))
}
