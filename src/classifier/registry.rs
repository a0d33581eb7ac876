//! Thread-safe registry of classifiers keyed by connection name. The
//! interceptor's entry point: look up or create, then classify.

use std::sync::Arc;

use dashmap::DashMap;

use crate::classifier::response::ResponseClassifier;
use crate::db::store::PsqrStore;
use crate::error::Result;
use crate::telemetry::Telemetry;
use crate::types::{ClassifierConfig, Observation};

pub struct ResponseClassifiers {
    classifiers: DashMap<String, Arc<ResponseClassifier>>,
    store: PsqrStore,
    telemetry: Arc<Telemetry>,
}

impl ResponseClassifiers {
    pub fn new(store: PsqrStore, telemetry: Arc<Telemetry>) -> Self {
        Self {
            classifiers: DashMap::new(),
            store,
            telemetry,
        }
    }

    /// Returns the classifier for `connection`, creating it with default
    /// config on first sight.
    pub fn dispatch(&self, connection: &str) -> Result<Arc<ResponseClassifier>> {
        self.dispatch_with_config(connection, ClassifierConfig::default())
    }

    /// Get-or-create with an explicit config. The config only matters on the
    /// creating call; later dispatches return the existing classifier
    /// untouched. Runtime reconfiguration is deliberately not supported.
    pub fn dispatch_with_config(
        &self,
        connection: &str,
        cfg: ClassifierConfig,
    ) -> Result<Arc<ResponseClassifier>> {
        if let Some(existing) = self.classifiers.get(connection) {
            return Ok(existing.clone());
        }

        let created = Arc::new(ResponseClassifier::new(
            connection,
            cfg,
            self.store.clone(),
            self.telemetry.clone(),
        )?);
        // entry() arbitrates the race between concurrent first dispatches.
        Ok(self
            .classifiers
            .entry(connection.to_string())
            .or_insert(created)
            .clone())
    }

    /// Composite entry point used by the transport interceptor: get-or-create,
    /// classify, record telemetry (inside the classify critical section), and
    /// return the smoothed score.
    pub async fn dispatch_and_classify(
        &self,
        connection: &str,
        cfg: ClassifierConfig,
        obs: Observation,
    ) -> Result<f64> {
        let classifier = self.dispatch_with_config(connection, cfg)?;
        classifier.classify(obs).await
    }

    pub fn get(&self, connection: &str) -> Option<Arc<ResponseClassifier>> {
        self.classifiers.get(connection).map(|c| c.clone())
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.classifiers.iter().map(|e| e.key().clone()).collect()
    }
}
