use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshatlas_gateway::cache::ResponseCache;
use meshatlas_gateway::codec::FrameCodec;
use meshatlas_gateway::config::GatewayConfig;
use meshatlas_gateway::ingest::IngestPipeline;
use meshatlas_gateway::repo::Repository;
use meshatlas_gateway::{mqtt, scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let (config, load_note) = GatewayConfig::load(&config_path);
    let config = Arc::new(config);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("meshatlas_gateway={},rumqttc=warn", config.log.level))
        }))
        .init();
    if let Some(note) = load_note {
        warn!("{note}");
    }
    info!("meshatlas gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database.url)
        .await
        .context("database connection failed")?;
    sqlx::raw_sql(include_str!("../schema.sql"))
        .execute(&pool)
        .await
        .context("schema bootstrap failed")?;

    let repo = Arc::new(Repository::new(pool, config.clone()));
    let cache = Arc::new(ResponseCache::new());
    let codec = Arc::new(FrameCodec::new(&config.meshtastic.channels));
    let pipeline = Arc::new(IngestPipeline::new(repo.clone()));

    let mut workers = mqtt::spawn_listeners(&config, codec, pipeline);
    workers.extend(scheduler::spawn(repo, cache, config.clone()));
    info!("{} workers running", workers.len());

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received, cancelling workers");
    for worker in &workers {
        worker.abort();
    }
    Ok(())
}
