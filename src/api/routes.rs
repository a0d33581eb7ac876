use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::health::HealthState;
use crate::classifier::ResponseClassifiers;
use crate::config::SCORE_QUANTILE;
use crate::db::store::{PsqrStore, SnapshotRecord};
use crate::error::AppError;
use crate::telemetry::{Telemetry, TelemetrySnapshot};
use crate::types::{ClassifierConfig, Observation};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ResponseClassifiers>,
    pub telemetry: Arc<Telemetry>,
    pub store: PsqrStore,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/connections", get(get_connections))
        .route("/connections/:name", get(get_connection))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub score: f64,
    pub last_observation: Option<Observation>,
}

#[derive(Serialize)]
pub struct ConnectionDetail {
    pub name: String,
    pub score: f64,
    pub config: ClassifierConfig,
    pub last_observation: Option<Observation>,
    pub current: Option<EstimatorView>,
    pub previous: Option<EstimatorView>,
    pub telemetry: Option<TelemetrySnapshot>,
}

/// Debug view of one persisted estimator window.
#[derive(Serialize)]
pub struct EstimatorView {
    pub id: i64,
    pub quantile: f64,
    pub count: i64,
    pub estimate_ms: f64,
    pub q: [f64; 5],
    pub n: [i64; 5],
    pub np: [f64; 5],
    pub dn: [f64; 5],
}

impl From<&SnapshotRecord> for EstimatorView {
    fn from(rec: &SnapshotRecord) -> Self {
        Self {
            id: rec.id,
            quantile: rec.psqr.quantile(),
            count: rec.psqr.count(),
            estimate_ms: rec.psqr.get(),
            q: rec.psqr.q(),
            n: rec.psqr.n(),
            np: rec.psqr.np(),
            dn: rec.psqr.dn(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub probe_rounds: u64,
    pub requests_completed: u64,
    pub last_request_at_ns: u64,
    pub connections: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_connections(
    State(state): State<ApiState>,
) -> Json<Vec<ConnectionSummary>> {
    let mut summaries = Vec::new();
    for name in state.registry.connection_names() {
        if let Some(classifier) = state.registry.get(&name) {
            summaries.push(ConnectionSummary {
                score: classifier.score().await,
                last_observation: classifier.last_observation().await,
                name,
            });
        }
    }
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    Json(summaries)
}

async fn get_connection(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionDetail>, AppError> {
    let Some(classifier) = state.registry.get(&name) else {
        return Err(AppError::NotFound(format!("connection {name:?}")));
    };

    let current = state.store.load_current(&name, SCORE_QUANTILE).await?;
    let previous = match current.as_ref().and_then(|c| c.previous_id) {
        Some(id) => state.store.load_by_id(id).await?,
        None => None,
    };

    Ok(Json(ConnectionDetail {
        score: classifier.score().await,
        config: *classifier.config(),
        last_observation: classifier.last_observation().await,
        current: current.as_ref().map(EstimatorView::from),
        previous: previous.as_ref().map(EstimatorView::from),
        telemetry: state.telemetry.snapshot(&name),
        name,
    }))
}

async fn get_health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let body = HealthResponse {
        status: "ok",
        probe_rounds: state.health.probe_rounds(),
        requests_completed: state.health.requests_completed(),
        last_request_at_ns: state.health.last_request_at_ns(),
        connections: state.registry.connection_names().len(),
    };
    (StatusCode::OK, Json(body))
}
