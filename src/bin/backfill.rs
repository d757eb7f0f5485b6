//! Manual backfill entry point.
//!
//! Usage:
//!   backfill [EventName ...]
//!
//! With no arguments every registered event type is replayed over the
//! configured recent block range.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use courtside::chain::projector::Projector;
use courtside::config::Config;
use courtside::webhook::backfill::Backfill;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = if Path::new("courtside.toml").exists() {
        Config::load(Path::new("courtside.toml"))?
    } else {
        Config::from_env()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let event_names: Vec<String> = std::env::args().skip(1).collect();
    info!(?event_names, "backfill requested");

    let store = courtside::store::connect(&config.store.url, &config.store.prefix).await?;
    let projector = Arc::new(Projector::new(store));
    let backfill = Backfill::new(config.backfill.clone(), projector)?;
    backfill.run(&event_names).await
}
