//! Slave-side replication worker.
//!
//! Every tick: fetch the master's full catalog from `/sync/export` with
//! the configured bearer token, then apply it through the same
//! single-transaction restore the local `/sync/import` handler uses.
//! Failures log and wait for the next tick; there is no backoff and no
//! delta protocol.

use anyhow::{Context, Result};
use meridian_cache::ZoneEvents;
use meridian_config::ReplicationConfig;
use meridian_store::{strip_timestamps, Store, SyncCatalog};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Periodic catalog sync from the configured master.
pub struct SyncWorker {
    master_url: String,
    api_token: String,
    interval: Duration,
    store: Store,
    events: ZoneEvents,
    client: reqwest::Client,
}

impl SyncWorker {
    /// Creates the worker from the replication configuration.
    pub fn new(config: &ReplicationConfig, store: Store, events: ZoneEvents) -> Self {
        Self {
            master_url: config.master_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            interval: Duration::from_secs(config.sync_interval_sec.max(1)),
            store,
            events,
            client: reqwest::Client::new(),
        }
    }

    /// Runs the poll loop until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            master = %self.master_url,
            interval_sec = self.interval.as_secs(),
            "replication worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sync_once().await {
                        Ok((zones, templates)) => {
                            debug!(zones, templates, "replication sync complete");
                        }
                        Err(e) => {
                            warn!(error = %e, "replication sync failed; retrying next tick");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("replication worker stopping");
                    return;
                }
            }
        }
    }

    /// One full sync cycle. Returns the zone and template counts applied.
    pub async fn sync_once(&self) -> Result<(usize, usize)> {
        let url = format!("{}/sync/export", self.master_url);
        let mut request = self.client.get(&url);
        if !self.api_token.is_empty() {
            request = request.bearer_auth(&self.api_token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()
            .with_context(|| format!("GET {}", url))?;

        let payload: serde_json::Value = response.json().await.context("decode sync payload")?;
        let catalog: SyncCatalog = serde_json::from_value(strip_timestamps(payload))
            .context("parse sync payload")?;

        let zones = catalog.zones.len();
        let templates = catalog.templates.len();

        self.store
            .sync_restore(catalog)
            .await
            .context("apply sync payload")?;
        self.events.publish();

        Ok((zones, templates))
    }
}
