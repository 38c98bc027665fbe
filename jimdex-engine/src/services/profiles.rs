//! Lazy recommender profile lookups
//!
//! Profiles only feed the display-name fallback of snapshots. Lookups are
//! fire-and-forget: failures are logged at the origin and never reach callers.

use async_trait::async_trait;
use reqwest::Url;
use chrono::Utc;
use jimdex_common::events::{EventBus, JimdexEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Public profile of a recommender
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl Profile {
    /// Preferred human-readable name, skipping blank values
    pub fn best_name(&self) -> Option<&str> {
        [self.display_name.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("network error: {0}")]
    Network(String),

    #[error("profile service returned status {0}")]
    Status(u16),

    #[error("unparseable profile: {0}")]
    Parse(String),

    #[error("invalid profile endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Source of recommender profiles
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, recommender_id: &str) -> Result<Profile, ProfileError>;
}

/// HTTP profile lookup: `GET {endpoint}/{recommender_id}`
pub struct HttpProfileSource {
    http_client: reqwest::Client,
    endpoint: Url,
}

impl HttpProfileSource {
    pub fn new(endpoint: &str, user_agent: &str, timeout: Duration) -> Result<Self, ProfileError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ProfileError::Network(e.to_string()))?;
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ProfileError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(ProfileError::InvalidEndpoint(endpoint.to_string()));
        }

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// `{endpoint}/{recommender_id}` with the id as one escaped path segment
    pub fn profile_url(&self, recommender_id: &str) -> Result<Url, ProfileError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ProfileError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(recommender_id);
        Ok(url)
    }
}

#[async_trait]
impl ProfileSource for HttpProfileSource {
    async fn fetch_profile(&self, recommender_id: &str) -> Result<Profile, ProfileError> {
        let url = self.profile_url(recommender_id)?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ProfileError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileError::Status(status.as_u16()));
        }

        response
            .json::<Profile>()
            .await
            .map_err(|e| ProfileError::Parse(e.to_string()))
    }
}

/// Queue limits
#[derive(Debug, Clone, Copy)]
pub struct ProfileQueueSettings {
    /// Maximum number of lookups queued or running at once
    pub capacity: usize,
    /// Maximum number of lookups running at once
    pub max_concurrent: usize,
}

struct ProfileQueueInner {
    source: Arc<dyn ProfileSource>,
    settings: ProfileQueueSettings,
    /// Recommenders with a lookup queued or running
    outstanding: Mutex<HashSet<String>>,
    resolved: RwLock<HashMap<String, Profile>>,
    permits: Arc<Semaphore>,
    event_bus: EventBus,
    cancel: CancellationToken,
}

/// Bounded background queue of profile lookups, keyed by recommender id
///
/// At most one lookup per recommender is queued or running at any time, and a
/// resolved profile is never looked up again.
#[derive(Clone)]
pub struct ProfileQueue {
    inner: Option<Arc<ProfileQueueInner>>,
    tasks: TaskTracker,
}

impl ProfileQueue {
    pub fn new(
        source: Arc<dyn ProfileSource>,
        settings: ProfileQueueSettings,
        event_bus: EventBus,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            inner: Some(Arc::new(ProfileQueueInner {
                source,
                settings,
                outstanding: Mutex::new(HashSet::new()),
                resolved: RwLock::new(HashMap::new()),
                permits,
                event_bus,
                cancel,
            })),
            tasks,
        }
    }

    /// Queue that never looks anything up
    pub fn disabled() -> Self {
        Self {
            inner: None,
            tasks: TaskTracker::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Schedule a lookup for `recommender_id`
    ///
    /// Returns `true` if a new lookup was queued; `false` when disabled,
    /// already resolved, already outstanding, or the queue is full.
    pub async fn enqueue(&self, recommender_id: &str) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };

        {
            // A finished lookup writes `resolved` before leaving `outstanding`
            let mut outstanding = inner.outstanding.lock().await;
            if outstanding.contains(recommender_id)
                || inner.resolved.read().await.contains_key(recommender_id)
            {
                return false;
            }
            if outstanding.len() >= inner.settings.capacity {
                debug!(recommender_id = %recommender_id, "Profile queue full, skipping lookup");
                return false;
            }
            outstanding.insert(recommender_id.to_string());
        }

        let inner = Arc::clone(inner);
        let recommender_id = recommender_id.to_string();
        self.tasks.spawn(async move {
            inner.lookup(&recommender_id).await;
            inner.outstanding.lock().await.remove(&recommender_id);
        });
        true
    }

    /// Resolved profile for a recommender, if any
    pub async fn profile(&self, recommender_id: &str) -> Option<Profile> {
        let inner = self.inner.as_ref()?;
        inner.resolved.read().await.get(recommender_id).cloned()
    }

    /// Display names of all resolved profiles
    pub async fn display_names(&self) -> HashMap<String, String> {
        let Some(inner) = &self.inner else {
            return HashMap::new();
        };
        inner
            .resolved
            .read()
            .await
            .iter()
            .filter_map(|(id, profile)| profile.best_name().map(|name| (id.clone(), name.to_string())))
            .collect()
    }

    /// Number of lookups queued or running
    pub async fn outstanding(&self) -> usize {
        match &self.inner {
            Some(inner) => inner.outstanding.lock().await.len(),
            None => 0,
        }
    }
}

impl ProfileQueueInner {
    async fn lookup(&self, recommender_id: &str) {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.source.fetch_profile(recommender_id) => result,
        };

        match result {
            Ok(profile) => {
                let display_name = profile.best_name().map(str::to_string);
                info!(
                    recommender_id = %recommender_id,
                    display_name = %display_name.as_deref().unwrap_or("<none>"),
                    "Resolved recommender profile"
                );
                self.resolved
                    .write()
                    .await
                    .insert(recommender_id.to_string(), profile);
                self.event_bus.emit_lossy(JimdexEvent::ProfileResolved {
                    recommender_id: recommender_id.to_string(),
                    display_name,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                debug!(recommender_id = %recommender_id, error = %e, "Profile lookup failed");
            }
        }
    }
}
