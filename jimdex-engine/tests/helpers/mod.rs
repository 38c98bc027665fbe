//! Shared fixtures for jimdex-engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use jimdex_common::config::RecordsConfig;
use jimdex_common::events::EventBus;
use jimdex_engine::models::{Enrichment, Metadata, RawRecord, Reserves};
use jimdex_engine::services::{
    DedupFetcher, EnrichmentSource, FetchError, Profile, ProfileError, ProfileQueue,
    ProfileQueueSettings, ProfileSource,
};
use jimdex_engine::subscriptions::StreamSubscriptions;
use jimdex_engine::ReconciliationEngine;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// In-memory enrichment source with per-address failures and delays
#[derive(Default)]
pub struct StubSource {
    calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn recover(&self, address: &str) {
        self.failing.lock().unwrap().remove(address);
    }

    pub fn delay(&self, address: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(address.to_string(), delay);
    }

    pub fn calls(&self, address: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl EnrichmentSource for StubSource {
    async fn fetch(&self, address: &str) -> Result<Enrichment, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default() += 1;

        let delay = self.delays.lock().unwrap().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(address) {
            return Err(FetchError::Status {
                url: format!("{address}/info"),
                status: 500,
            });
        }

        Ok(Enrichment {
            metadata: Metadata {
                name: Some(address.to_string()),
                ..Default::default()
            },
            reserves: Reserves::default(),
        })
    }
}

/// Profile source answering `Name of <id>` for every recommender
#[derive(Default)]
pub struct StubProfiles {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ProfileSource for StubProfiles {
    async fn fetch_profile(&self, recommender_id: &str) -> Result<Profile, ProfileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Profile {
            display_name: Some(format!("Name of {recommender_id}")),
            ..Default::default()
        })
    }
}

/// Feed collaborator that only counts restarts
#[derive(Default)]
pub struct CountingSubscriptions {
    pub restarts: AtomicUsize,
}

#[async_trait]
impl StreamSubscriptions for CountingSubscriptions {
    async fn restart(&self) -> anyhow::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn engine_with(source: Arc<StubSource>) -> ReconciliationEngine {
    ReconciliationEngine::new(
        DedupFetcher::new(source, Duration::from_secs(5)),
        ProfileQueue::disabled(),
        EventBus::new(256),
        TaskTracker::new(),
        CancellationToken::new(),
    )
}

pub fn engine_with_profiles(
    source: Arc<StubSource>,
    profiles: Arc<StubProfiles>,
) -> ReconciliationEngine {
    let event_bus = EventBus::new(256);
    let tasks = TaskTracker::new();
    let cancel = CancellationToken::new();
    let queue = ProfileQueue::new(
        profiles,
        ProfileQueueSettings {
            capacity: 64,
            max_concurrent: 4,
        },
        event_bus.clone(),
        tasks.clone(),
        cancel.clone(),
    );
    ReconciliationEngine::new(
        DedupFetcher::new(source, Duration::from_secs(5)),
        queue,
        event_bus,
        tasks,
        cancel,
    )
}

pub fn kinds() -> RecordsConfig {
    RecordsConfig::default()
}

/// Announcement record for `address`, keyed by `id`
pub fn announcement(id: &str, address: &str) -> RawRecord {
    RawRecord {
        id: id.to_string(),
        pubkey: format!("author-of-{id}"),
        kind: kinds().announcement_kind,
        created_at: 1_700_000_000,
        tags: vec![vec!["d".to_string(), address.to_string()]],
        content: String::new(),
    }
}

/// Recommendation record: `recommender` recommends `entry_id`
pub fn recommendation(recommender: &str, entry_id: &str) -> RawRecord {
    let kinds = kinds();
    RawRecord {
        id: format!("rec-{recommender}-{entry_id}"),
        pubkey: recommender.to_string(),
        kind: kinds.recommendation_kind,
        created_at: 1_700_000_100,
        tags: vec![
            vec!["k".to_string(), kinds.announcement_kind.to_string()],
            vec!["d".to_string(), entry_id.to_string()],
        ],
        content: String::new(),
    }
}

/// Announce `entry_id` at `address` through the engine API
pub async fn announce(engine: &ReconciliationEngine, entry_id: &str, address: &str) {
    engine
        .apply_announcement_delta(entry_id, address, announcement(entry_id, address))
        .await;
}

pub fn ids(views: &[jimdex_engine::models::EntryView]) -> Vec<&str> {
    views.iter().map(|v| v.entry_id.as_str()).collect()
}
