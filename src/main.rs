use chrono::Duration as ChronoDuration;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use courtside::alias::AliasResolver;
use courtside::chain::projector::Projector;
use courtside::config::Config;
use courtside::finality::Archiver;
use courtside::reconcile::feeds::FeedClients;
use courtside::reconcile::Reconciler;
use courtside::webhook::{self, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new("courtside.toml").exists() {
        Config::load(Path::new("courtside.toml"))?
    } else {
        Config::from_env()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("courtside v{} starting", env!("CARGO_PKG_VERSION"));

    let store = courtside::store::connect(&config.store.url, &config.store.prefix).await?;
    let resolver = Arc::new(AliasResolver::new());
    let projector = Arc::new(Projector::new(store.clone()));

    // Webhook listener: the on-chain half of the system.
    let webhook_state = WebhookState { projector: projector.clone() };
    let bind_addr = config.webhook.bind_addr.clone();
    let webhook_task = tokio::spawn(async move {
        if let Err(err) = webhook::serve(webhook_state, &bind_addr).await {
            error!(error = %err, "webhook listener exited");
        }
    });

    // Reconciliation loop: the feed half. Without credentials there is
    // nothing to poll, but projections still flow through the webhook.
    if config.has_feed_credentials() {
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            FeedClients::new(config.feeds.clone())?,
            resolver,
        ));
        let archiver = Arc::new(Archiver::new(
            store.clone(),
            ChronoDuration::hours(config.reconcile.archive_age_hours as i64),
        ));
        let interval_secs = config.reconcile.refresh_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = reconciler.run_cycle().await {
                    error!(error = %err, "reconciliation cycle failed");
                }
                if let Err(err) = archiver.run().await {
                    error!(error = %err, "archival pass failed");
                }
            }
        });
        info!(interval_secs, "reconciliation loop started");
    } else {
        warn!("feed credentials missing, reconciliation disabled");
    }

    webhook_task.await?;
    Ok(())
}
