//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status ("ok" once the initial load finished, "loading" before)
    pub status: String,
    /// Module name ("jimdex-engine")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub loaded: bool,
    /// Entries known, enriched or not
    pub entries: usize,
    /// Entries visible in snapshots
    pub visible_entries: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;
    let loaded = state.engine.has_loaded();

    Json(HealthResponse {
        status: if loaded { "ok" } else { "loading" }.to_string(),
        module: "jimdex-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        loaded,
        entries: state.engine.entry_count().await,
        visible_entries: state.engine.visible_count().await,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
