use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use upwatch::{
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{Config, read_config_file},
    ingest::ResultIngestor,
    notify::{LogNotifier, NotificationHandle, Notifier, WebhookNotifier},
    queue::RegionRegistry,
    scheduler::{Scheduler, SchedulerHandle},
    slug::{RetryPolicy, SlugAllocator, SlugHandle, seed_tickets},
    storage::{StorageBackend, sqlite::SqliteBackend},
    util::get_internal_secret,
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("upwatch", LevelFilter::DEBUG),
        ("upwatch_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let internal_secret =
        get_internal_secret().context("UPWATCH_INTERNAL_SECRET must be set")?;

    run(config, internal_secret).await
}

async fn run(config: Config, internal_secret: String) -> anyhow::Result<()> {
    let db_timeout = config.storage.db_timeout();
    let store: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&config.storage.path).await?);

    if config.slugs.seed {
        seed_tickets(store.as_ref(), &config.slugs).await?;
    }

    let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url,
            std::time::Duration::from_secs(config.notifier.timeout_secs),
            store.clone(),
        )?),
        None => {
            warn!("no notifier webhook configured, downtime alerts are only logged");
            Arc::new(LogNotifier)
        }
    };
    let notifications = NotificationHandle::spawn(notifier);

    let slugs = SlugHandle::spawn(
        SlugAllocator::new(store.clone(), db_timeout),
        RetryPolicy::default(),
    );

    let regions = RegionRegistry::from_config(&config.regions, config.scheduler.send_timeout())?;
    info!(
        "dispatching to regions: {}",
        regions.region_ids().collect::<Vec<_>>().join(", ")
    );
    let scheduler = SchedulerHandle::spawn(
        Scheduler::new(store.clone(), regions, &config.scheduler, db_timeout),
        config.scheduler.tick(),
    );

    let ingestor = ResultIngestor::new(store.clone(), notifications.clone(), db_timeout);
    let addr = spawn_api_server(
        ApiConfig {
            bind_addr: config.api.bind,
            internal_secret,
            enable_cors: config.api.enable_cors,
        },
        ApiState::new(store.clone(), ingestor, slugs.clone()),
    )
    .await?;
    info!("accepting results on {addr}");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    scheduler.shutdown().await;
    slugs.shutdown().await;
    notifications.shutdown().await;
    store.close().await?;

    Ok(())
}
