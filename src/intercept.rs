//! Outbound HTTP instrumentation. Wraps a reqwest client, measures elapsed
//! wall-clock time per request, and hands the observation to the classifier
//! registry on a spawned task so scoring never delays the request path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::classifier::ResponseClassifiers;
use crate::error::Result;
use crate::types::{ClassifierConfig, Observation};

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct ScoredClient {
    client: reqwest::Client,
    registry: Arc<ResponseClassifiers>,
    cfg: ClassifierConfig,
}

impl ScoredClient {
    pub fn new(registry: Arc<ResponseClassifiers>, cfg: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, registry, cfg })
    }

    /// GETs `url` and classifies the response under `connection`. Classification
    /// is fire-and-forget: its errors are logged on the spawned task and never
    /// reach the caller. Transport failures skip classification entirely.
    pub async fn get(&self, connection: &str, url: &str) -> Result<reqwest::Response> {
        let started = Instant::now();
        let response = self.client.get(url).send().await?;
        let elapsed_ms = started.elapsed().as_millis().min(i64::MAX as u128) as i64;

        let obs = Observation::new(elapsed_ms, response.status().as_u16());
        let registry = Arc::clone(&self.registry);
        let cfg = self.cfg;
        let name = connection.to_string();
        tokio::spawn(async move {
            match registry.dispatch_and_classify(&name, cfg, obs).await {
                Ok(score) => debug!(
                    connection = %name,
                    elapsed_ms = obs.elapsed_ms,
                    code = obs.status_code,
                    score,
                    "classified",
                ),
                Err(e) => warn!(connection = %name, "classification failed: {e}"),
            }
        });

        Ok(response)
    }
}
