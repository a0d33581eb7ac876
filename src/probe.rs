//! Demo traffic driver. Fires a round of GETs at the configured upstreams on
//! a fixed interval; every response flows through the instrumented client and
//! ends up classified. Useful for watching scores move without wiring the
//! client into a real application.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::config::{Config, ProbeTarget};
use crate::intercept::ScoredClient;

pub struct ProbeDriver {
    targets: Vec<ProbeTarget>,
    interval_secs: u64,
    client: Arc<ScoredClient>,
    health: Arc<HealthState>,
}

impl ProbeDriver {
    pub fn new(cfg: &Config, client: Arc<ScoredClient>, health: Arc<HealthState>) -> Self {
        Self {
            targets: cfg.probe_targets.clone(),
            interval_secs: cfg.probe_interval_secs.max(1),
            client,
            health,
        }
    }

    pub async fn run(self) {
        if self.targets.is_empty() {
            info!("PROBE_TARGETS not set — probe driver idle. Example: PROBE_TARGETS=edge=https://example.com,api=https://api.example.com");
            return;
        }
        info!(
            targets = self.targets.len(),
            interval_secs = self.interval_secs,
            "probe driver started",
        );

        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.tick().await; // consume immediate first tick

        loop {
            ticker.tick().await;
            self.health.mark_round();

            for target in &self.targets {
                let client = Arc::clone(&self.client);
                let health = Arc::clone(&self.health);
                let ProbeTarget { name, url } = target.clone();
                tokio::spawn(async move {
                    match client.get(&name, &url).await {
                        Ok(response) => {
                            health.mark_request();
                            debug!(target = %name, code = response.status().as_u16(), "probed");
                        }
                        Err(e) => warn!(target = %name, "probe failed: {e}"),
                    }
                });
            }
        }
    }
}
