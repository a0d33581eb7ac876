mod api;
mod classifier;
mod config;
mod db;
mod error;
mod intercept;
mod probe;
mod psqr;
mod telemetry;
mod types;

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::classifier::ResponseClassifiers;
use crate::config::{Config, DB_BUSY_TIMEOUT_MS};
use crate::db::PsqrStore;
use crate::error::Result;
use crate::intercept::ScoredClient;
use crate::probe::ProbeDriver;
use crate::telemetry::Telemetry;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    // Single writer connection: WAL keeps readers unblocked, the busy timeout
    // absorbs the occasional contention from API reads.
    let options = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(DB_BUSY_TIMEOUT_MS));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Core state ---
    let store = PsqrStore::new(pool);
    let telemetry = Arc::new(Telemetry::new());
    let registry = Arc::new(ResponseClassifiers::new(store.clone(), Arc::clone(&telemetry)));
    let health = Arc::new(HealthState::new());

    // --- Probe driver (demo traffic) ---
    let client = Arc::new(ScoredClient::new(Arc::clone(&registry), cfg.classifier)?);
    let driver = ProbeDriver::new(&cfg, client, Arc::clone(&health));
    tokio::spawn(async move { driver.run().await });

    // --- HTTP API server ---
    let api_state = ApiState { registry, telemetry, store, health };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
