//! Manual event replay from a block-explorer log API.
//!
//! When the webhook provider drops a delivery (or the service was down),
//! the projections drift until the missed events are replayed. Backfill
//! queries an explorer's `getLogs` endpoint per event type over a bounded
//! recent block range and pushes every found log through the normal
//! dispatch path with `is_sync` set, so handlers know this is catch-up
//! traffic.

use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chain::projector::{EventContext, Projector};
use crate::chain::registry::{self, EventSpec, EVENTS, PROTOCOL_EVENT_TOPIC};
use crate::chain::{dispatch_batch, RawLog};
use crate::config::BackfillConfig;

const EXPLORER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ExplorerLogs {
    #[serde(default)]
    result: Vec<RawLog>,
}

#[derive(Debug, Deserialize)]
struct ExplorerBlockNumber {
    result: String,
}

pub struct Backfill {
    http: Client,
    cfg: BackfillConfig,
    projector: Arc<Projector>,
}

impl Backfill {
    pub fn new(cfg: BackfillConfig, projector: Arc<Projector>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(EXPLORER_TIMEOUT).build()?;
        Ok(Self { http, cfg, projector })
    }

    /// Replay the named event types (all registered types when the list is
    /// empty) over the configured recent block span.
    pub async fn run(&self, event_names: &[String]) -> anyhow::Result<()> {
        let specs = resolve_events(event_names);
        if specs.is_empty() {
            warn!("no recognized event types to backfill");
            return Ok(());
        }

        let latest = self.latest_block().await?;
        let from = latest.saturating_sub(self.cfg.block_span);
        info!(from, to = latest, events = specs.len(), "backfill started");

        let ctx = EventContext { is_sync: true, ..Default::default() };
        for spec in specs {
            let logs = self.fetch_logs(spec, from, latest).await?;
            let (projected, failed) = dispatch_batch(&self.projector, &logs, &ctx).await;
            info!(
                event = spec.name,
                found = logs.len(),
                projected,
                failed,
                "event type replayed"
            );
        }
        Ok(())
    }

    async fn latest_block(&self) -> anyhow::Result<u64> {
        let url = format!(
            "{}?module=proxy&action=eth_blockNumber",
            self.cfg.explorer_url
        );
        let response: ExplorerBlockNumber = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let hex = response.result.trim_start_matches("0x");
        Ok(u64::from_str_radix(hex, 16)?)
    }

    async fn fetch_logs(
        &self,
        spec: &EventSpec,
        from: u64,
        to: u64,
    ) -> anyhow::Result<Vec<RawLog>> {
        let url = format!(
            "{}?module=logs&action=getLogs&fromBlock={}&toBlock={}&address={}\
             &topic0={:#x}&topic0_1_opr=and&topic1={:#x}",
            self.cfg.explorer_url, from, to, self.cfg.contract_address,
            PROTOCOL_EVENT_TOPIC, spec.topic,
        );
        let response: ExplorerLogs = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.result)
    }
}

/// Map requested names to registry entries; unknown names are logged and
/// dropped, an empty request means everything.
fn resolve_events(event_names: &[String]) -> Vec<&'static EventSpec> {
    if event_names.is_empty() {
        return EVENTS.iter().collect();
    }
    event_names
        .iter()
        .filter_map(|name| {
            let spec = registry::by_name(name);
            if spec.is_none() {
                warn!(name, "unknown event type requested for backfill");
            }
            spec
        })
        .collect()
}
