//! jimdex-engine library interface
//!
//! Directory reconciliation engine plus its HTTP surface. The binary wires
//! these together; integration tests use them directly.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod subscriptions;
pub mod trust;

pub use crate::engine::ReconciliationEngine;
pub use crate::error::{ApiError, ApiResult};

use anyhow::Context;
use axum::Router;
use chrono::{DateTime, Utc};
use jimdex_common::events::EventBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::EngineSettings;
use crate::services::{DedupFetcher, HttpEnrichmentFetcher, HttpProfileSource, ProfileQueue};
use crate::session::SessionManager;
use crate::subscriptions::ChannelSubscriptions;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: ReconciliationEngine,
    pub session: Arc<SessionManager>,
    /// Intake for records pushed by stream bridges
    pub subscriptions: Arc<ChannelSubscriptions>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        engine: ReconciliationEngine,
        session: Arc<SessionManager>,
        subscriptions: Arc<ChannelSubscriptions>,
    ) -> Self {
        let event_bus = engine.event_bus().clone();
        Self {
            engine,
            session,
            subscriptions,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::directory_routes())
        .merge(api::record_routes())
        .merge(api::session_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build an engine backed by the HTTP enrichment and profile sources
pub fn build_engine(
    settings: &EngineSettings,
    event_bus: EventBus,
    tasks: TaskTracker,
    cancel: CancellationToken,
) -> anyhow::Result<ReconciliationEngine> {
    let http = HttpEnrichmentFetcher::new(&settings.fetcher)
        .context("Failed to build enrichment HTTP client")?;
    let fetcher = DedupFetcher::new(Arc::new(http), settings.fetcher.timeout);

    let profiles = match &settings.profile_endpoint {
        Some(endpoint) => {
            let source = HttpProfileSource::new(
                endpoint,
                &settings.fetcher.user_agent,
                settings.fetcher.timeout,
            )
            .context("Failed to build profile HTTP client")?;
            info!(endpoint = %endpoint, "Profile lookups enabled");
            ProfileQueue::new(
                Arc::new(source),
                settings.profile_queue,
                event_bus.clone(),
                tasks.clone(),
                cancel.clone(),
            )
        }
        None => {
            info!("Profile lookups disabled (no profiles.endpoint configured)");
            ProfileQueue::disabled()
        }
    };

    Ok(ReconciliationEngine::new(
        fetcher, profiles, event_bus, tasks, cancel,
    ))
}
