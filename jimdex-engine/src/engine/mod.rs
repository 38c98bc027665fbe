//! Reconciliation engine
//!
//! Single owner of the entry table. Announcement and recommendation deltas
//! arrive unordered and possibly duplicated; the engine merges them into one
//! entry per key, drives enrichment on background tasks and serves ranked
//! snapshots.
//!
//! Every mutation holds the table write lock for the whole read-modify-write.
//! Network work never runs under the lock: enrichment results are applied in
//! a second critical section, and only if the entry's revision and address
//! still match the attempt that produced them.

pub mod ranking;

use crate::models::{Enrichment, EnrichmentState, Entry, EntryView, RawRecord, ViewerContext};
use crate::services::{validate_address, DedupFetcher, EnrichmentSource, FetchError, ProfileQueue};
use crate::trust::{recompute_mutuality, MutualityChange};
use chrono::Utc;
use jimdex_common::events::{EventBus, JimdexEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Poll interval of [`ReconciliationEngine::wait_for_background_tasks`]
const IDLE_POLL: Duration = Duration::from_millis(2);

/// What an announcement delta did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementOutcome {
    /// New entry inserted, enrichment scheduled
    Created,
    /// Same address, newer source record stored
    Updated,
    /// Address changed; old enrichment discarded, re-enrichment scheduled
    Readdressed,
    /// Same address after a failed enrichment; new attempt scheduled
    RetryScheduled,
    /// Exact repeat of the stored announcement
    Unchanged,
    /// Malformed address; delta dropped
    Rejected,
}

impl AnnouncementOutcome {
    /// Whether this delta scheduled an enrichment fetch
    pub fn schedules_enrichment(self) -> bool {
        matches!(
            self,
            AnnouncementOutcome::Created
                | AnnouncementOutcome::Readdressed
                | AnnouncementOutcome::RetryScheduled
        )
    }
}

/// What a recommendation delta did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationOutcome {
    /// Recommender merged into an existing entry
    Added { mutual: bool },
    /// Entry not seen yet; held until its announcement arrives
    Buffered,
    /// Already merged or already buffered
    Duplicate,
    /// Empty entry or recommender id
    Ignored,
}

/// One scheduled enrichment fetch
#[derive(Debug, Clone)]
struct EnrichmentAttempt {
    entry_id: String,
    address: String,
    revision: u64,
}

#[derive(Debug, Default)]
struct EntryTable {
    entries: HashMap<String, Entry>,
    /// Recommendations for entries not announced yet, by entry id
    pending_recommendations: HashMap<String, BTreeSet<String>>,
    viewer: Option<ViewerContext>,
    next_seq: u64,
}

impl EntryTable {
    fn classify(&self, recommender_id: &str) -> bool {
        self.viewer
            .as_ref()
            .map_or(false, |viewer| viewer.is_mutual(recommender_id))
    }

    /// Insert a new entry and fold in its buffered recommendations
    ///
    /// Returns the attempt to schedule and the recommenders merged from the
    /// buffer with their mutual bit.
    fn insert_entry(
        &mut self,
        entry_id: &str,
        address: &str,
        source_record: RawRecord,
    ) -> (EnrichmentAttempt, Vec<(String, bool)>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut entry = Entry::new(entry_id.to_string(), address.to_string(), source_record, seq);
        entry.revision = 1;

        let mut drained = Vec::new();
        if let Some(buffered) = self.pending_recommendations.remove(entry_id) {
            for recommender_id in buffered {
                let mutual = self.classify(&recommender_id);
                if entry.add_recommender(&recommender_id, mutual) {
                    drained.push((recommender_id, mutual));
                }
            }
        }

        let attempt = EnrichmentAttempt {
            entry_id: entry_id.to_string(),
            address: address.to_string(),
            revision: entry.revision,
        };
        self.entries.insert(entry_id.to_string(), entry);
        (attempt, drained)
    }
}

/// Merge a repeat announcement into an existing entry
fn merge_announcement(
    entry: &mut Entry,
    address: &str,
    source_record: RawRecord,
) -> (AnnouncementOutcome, Option<EnrichmentAttempt>) {
    let outcome = if entry.address != address {
        entry.address = address.to_string();
        AnnouncementOutcome::Readdressed
    } else if matches!(entry.enrichment, EnrichmentState::Failed { .. }) {
        AnnouncementOutcome::RetryScheduled
    } else if entry.source_record == source_record {
        return (AnnouncementOutcome::Unchanged, None);
    } else {
        AnnouncementOutcome::Updated
    };

    entry.source_record = source_record;

    if !outcome.schedules_enrichment() {
        return (outcome, None);
    }

    entry.enrichment = EnrichmentState::Pending;
    entry.revision += 1;
    let attempt = EnrichmentAttempt {
        entry_id: entry.entry_id.clone(),
        address: entry.address.clone(),
        revision: entry.revision,
    };
    (outcome, Some(attempt))
}

struct EngineInner {
    table: RwLock<EntryTable>,
    fetcher: DedupFetcher,
    profiles: ProfileQueue,
    event_bus: EventBus,
    tasks: TaskTracker,
    cancel: CancellationToken,
    loaded: AtomicBool,
}

/// Directory reconciliation engine
///
/// Cloning is cheap; all clones share the same table.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    /// Create an engine
    ///
    /// Enrichment fetches and profile lookups run on `tasks`; `cancel` stops
    /// them at shutdown. `profiles` should share the same tracker and token.
    pub fn new(
        fetcher: DedupFetcher,
        profiles: ProfileQueue,
        event_bus: EventBus,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                table: RwLock::new(EntryTable::default()),
                fetcher,
                profiles,
                event_bus,
                tasks,
                cancel,
                loaded: AtomicBool::new(false),
            }),
        }
    }

    /// Merge an announcement for `entry_id`
    ///
    /// Malformed addresses are dropped with a warning; the caller is never
    /// failed.
    pub async fn apply_announcement_delta(
        &self,
        entry_id: &str,
        address: &str,
        source_record: RawRecord,
    ) -> AnnouncementOutcome {
        if let Err(e) = validate_address(address) {
            warn!(
                entry_id = %entry_id,
                address = %address,
                error = %e,
                "Skipping announcement with malformed address"
            );
            return AnnouncementOutcome::Rejected;
        }

        let (outcome, attempt, drained) = {
            let mut table = self.inner.table.write().await;
            match table.entries.get_mut(entry_id) {
                Some(entry) => {
                    let (outcome, attempt) = merge_announcement(entry, address, source_record);
                    (outcome, attempt, Vec::new())
                }
                None => {
                    let (attempt, drained) = table.insert_entry(entry_id, address, source_record);
                    (AnnouncementOutcome::Created, Some(attempt), drained)
                }
            }
        };

        match outcome {
            AnnouncementOutcome::Created => {
                info!(
                    entry_id = %entry_id,
                    address = %address,
                    buffered_recommendations = drained.len(),
                    "Discovered entry"
                );
                self.inner.event_bus.emit_lossy(JimdexEvent::EntryDiscovered {
                    entry_id: entry_id.to_string(),
                    address: address.to_string(),
                    timestamp: Utc::now(),
                });
            }
            AnnouncementOutcome::Readdressed => {
                info!(entry_id = %entry_id, address = %address, "Entry address changed, re-enriching");
            }
            AnnouncementOutcome::RetryScheduled => {
                info!(entry_id = %entry_id, address = %address, "Retrying enrichment after failure");
            }
            AnnouncementOutcome::Updated => {
                debug!(entry_id = %entry_id, "Replaced announcement record");
            }
            AnnouncementOutcome::Unchanged | AnnouncementOutcome::Rejected => {
                trace!(entry_id = %entry_id, "Duplicate announcement");
            }
        }

        for (recommender_id, mutual) in &drained {
            self.recommendation_added(entry_id, recommender_id, *mutual).await;
        }

        if let Some(attempt) = attempt {
            self.spawn_enrichment(attempt);
        }

        outcome
    }

    /// Merge "`recommender_id` recommends `entry_id`"
    pub async fn apply_recommendation_delta(
        &self,
        entry_id: &str,
        recommender_id: &str,
    ) -> RecommendationOutcome {
        if entry_id.is_empty() || recommender_id.is_empty() {
            debug!(
                entry_id = %entry_id,
                recommender_id = %recommender_id,
                "Ignoring recommendation with empty id"
            );
            return RecommendationOutcome::Ignored;
        }

        let outcome = {
            let mut table = self.inner.table.write().await;
            let mutual = table.classify(recommender_id);
            match table.entries.get_mut(entry_id) {
                Some(entry) => {
                    if entry.add_recommender(recommender_id, mutual) {
                        RecommendationOutcome::Added { mutual }
                    } else {
                        RecommendationOutcome::Duplicate
                    }
                }
                None => {
                    let newly_buffered = table
                        .pending_recommendations
                        .entry(entry_id.to_string())
                        .or_default()
                        .insert(recommender_id.to_string());
                    if newly_buffered {
                        RecommendationOutcome::Buffered
                    } else {
                        RecommendationOutcome::Duplicate
                    }
                }
            }
        };

        match outcome {
            RecommendationOutcome::Added { mutual } => {
                self.recommendation_added(entry_id, recommender_id, mutual)
                    .await;
            }
            RecommendationOutcome::Buffered => {
                debug!(
                    entry_id = %entry_id,
                    recommender_id = %recommender_id,
                    "Buffered recommendation for unknown entry"
                );
            }
            _ => {
                trace!(
                    entry_id = %entry_id,
                    recommender_id = %recommender_id,
                    "Duplicate recommendation"
                );
            }
        }

        outcome
    }

    async fn recommendation_added(&self, entry_id: &str, recommender_id: &str, mutual: bool) {
        debug!(
            entry_id = %entry_id,
            recommender_id = %recommender_id,
            mutual,
            "Merged recommendation"
        );
        self.inner
            .event_bus
            .emit_lossy(JimdexEvent::RecommendationAdded {
                entry_id: entry_id.to_string(),
                recommender_id: recommender_id.to_string(),
                mutual,
                timestamp: Utc::now(),
            });
        if mutual {
            self.inner.profiles.enqueue(recommender_id).await;
        }
    }

    fn spawn_enrichment(&self, attempt: EnrichmentAttempt) {
        let engine = self.clone();
        self.inner.tasks.spawn(async move {
            let result = tokio::select! {
                _ = engine.inner.cancel.cancelled() => {
                    debug!(entry_id = %attempt.entry_id, "Enrichment cancelled");
                    return;
                }
                result = engine.inner.fetcher.fetch(&attempt.address) => result,
            };
            engine.complete_enrichment(attempt, result).await;
        });
    }

    async fn complete_enrichment(
        &self,
        attempt: EnrichmentAttempt,
        result: Result<Enrichment, FetchError>,
    ) {
        let applied = {
            let mut table = self.inner.table.write().await;
            match table.entries.get_mut(&attempt.entry_id) {
                Some(entry)
                    if entry.revision == attempt.revision && entry.address == attempt.address =>
                {
                    entry.enrichment = match &result {
                        Ok(enrichment) => EnrichmentState::Enriched(enrichment.clone()),
                        Err(e) => EnrichmentState::Failed {
                            reason: e.to_string(),
                        },
                    };
                    true
                }
                _ => false,
            }
        };

        if !applied {
            debug!(
                entry_id = %attempt.entry_id,
                address = %attempt.address,
                revision = attempt.revision,
                "Discarding stale enrichment result"
            );
            return;
        }

        match result {
            Ok(_) => {
                info!(entry_id = %attempt.entry_id, address = %attempt.address, "Entry enriched");
                self.inner.event_bus.emit_lossy(JimdexEvent::EntryEnriched {
                    entry_id: attempt.entry_id,
                    address: attempt.address,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(
                    entry_id = %attempt.entry_id,
                    address = %attempt.address,
                    error = %e,
                    "Enrichment failed"
                );
                self.inner.event_bus.emit_lossy(JimdexEvent::EnrichmentFailed {
                    entry_id: attempt.entry_id,
                    address: attempt.address,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Ranked, point-in-time list of enriched entries
    ///
    /// With a viewer, entries rank by mutual recommenders (stored bits plus
    /// the given viewer's follows); without one, by all recommenders. Ties
    /// keep insertion order.
    pub async fn snapshot(&self, viewer: Option<&ViewerContext>) -> Vec<EntryView> {
        let names = self.inner.profiles.display_names().await;
        let table = self.inner.table.read().await;

        ranking::rank(table.entries.values(), viewer)
            .into_iter()
            .filter_map(|entry| entry.view(viewer, |id| names.get(id).cloned()))
            .collect()
    }

    /// Install `viewer` and recompute mutuality over the whole table
    ///
    /// Newly mutual recommenders are queued for a profile lookup.
    pub async fn apply_viewer(&self, viewer: ViewerContext) -> MutualityChange {
        let change = {
            let mut guard = self.inner.table.write().await;
            let table = &mut *guard;
            let change = recompute_mutuality(table.entries.values_mut(), &viewer);
            table.viewer = Some(viewer.clone());
            change
        };

        info!(
            viewer_id = %viewer.viewer_id,
            follows = viewer.follow_set.len(),
            newly_mutual = change.newly_mutual.len(),
            entries_changed = change.entries_changed,
            "Recomputed mutuality"
        );
        self.inner
            .event_bus
            .emit_lossy(JimdexEvent::MutualityRecomputed {
                viewer_id: viewer.viewer_id.clone(),
                newly_mutual: change.newly_mutual.iter().cloned().collect(),
                timestamp: Utc::now(),
            });

        for recommender_id in &change.newly_mutual {
            self.inner.profiles.enqueue(recommender_id).await;
        }

        change
    }

    /// Installed viewer, if a session is authenticated
    pub async fn current_viewer(&self) -> Option<ViewerContext> {
        self.inner.table.read().await.viewer.clone()
    }

    /// Copy of one entry, visible or not
    pub async fn entry(&self, entry_id: &str) -> Option<Entry> {
        self.inner.table.read().await.entries.get(entry_id).cloned()
    }

    /// Number of entries, including ones not enriched yet
    pub async fn entry_count(&self) -> usize {
        self.inner.table.read().await.entries.len()
    }

    /// Number of entries visible in snapshots
    pub async fn visible_count(&self) -> usize {
        self.inner
            .table
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.enrichment.is_enriched())
            .count()
    }

    /// Number of recommendations waiting for their entry
    pub async fn buffered_recommendation_count(&self) -> usize {
        self.inner
            .table
            .read()
            .await
            .pending_recommendations
            .values()
            .map(BTreeSet::len)
            .sum()
    }

    /// Whether the initial feed load has completed
    pub fn has_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    /// Mark the initial load complete; returns `true` the first time
    pub fn mark_loaded(&self) -> bool {
        let first = !self.inner.loaded.swap(true, Ordering::AcqRel);
        if first {
            info!("Initial directory load complete");
        }
        first
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn profiles(&self) -> &ProfileQueue {
        &self.inner.profiles
    }

    /// Wait until no enrichment or profile task is running
    ///
    /// Leaves the task tracker open, so it can run alongside [`Self::shutdown`].
    pub async fn wait_for_background_tasks(&self) {
        while !self.inner.tasks.is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Cancel background work and wait for it to stop
    pub async fn shutdown(&self) {
        info!("Stopping reconciliation engine");
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, Reserves};
    use async_trait::async_trait;

    struct NamedSource;

    #[async_trait]
    impl EnrichmentSource for NamedSource {
        async fn fetch(&self, address: &str) -> Result<Enrichment, FetchError> {
            Ok(Enrichment {
                metadata: Metadata {
                    name: Some(address.to_string()),
                    ..Default::default()
                },
                reserves: Reserves::default(),
            })
        }
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(
            DedupFetcher::new(Arc::new(NamedSource), Duration::from_secs(5)),
            ProfileQueue::disabled(),
            EventBus::new(64),
            TaskTracker::new(),
            CancellationToken::new(),
        )
    }

    fn record(id: &str) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            pubkey: "author".to_string(),
            kind: 31678,
            created_at: 1,
            tags: vec![],
            content: String::new(),
        }
    }

    #[tokio::test]
    async fn test_first_announcement_creates_pending_entry() {
        let engine = engine();
        let outcome = engine
            .apply_announcement_delta("e1", "https://x.example", record("e1"))
            .await;
        assert_eq!(outcome, AnnouncementOutcome::Created);
        assert_eq!(engine.entry_count().await, 1);

        engine.wait_for_background_tasks().await;
        assert_eq!(engine.visible_count().await, 1);
    }

    #[tokio::test]
    async fn test_trailing_slash_is_rejected() {
        let engine = engine();
        let outcome = engine
            .apply_announcement_delta("e1", "https://x.example/", record("e1"))
            .await;
        assert_eq!(outcome, AnnouncementOutcome::Rejected);
        assert_eq!(engine.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_buffered_recommendation_is_drained_on_creation() {
        let engine = engine();
        assert_eq!(
            engine.apply_recommendation_delta("e1", "r1").await,
            RecommendationOutcome::Buffered
        );
        assert_eq!(
            engine.apply_recommendation_delta("e1", "r1").await,
            RecommendationOutcome::Duplicate
        );
        assert_eq!(engine.buffered_recommendation_count().await, 1);

        engine
            .apply_announcement_delta("e1", "https://x.example", record("e1"))
            .await;

        assert_eq!(engine.buffered_recommendation_count().await, 0);
        let entry = engine.entry("e1").await.unwrap();
        assert!(entry.recommenders.contains_key("r1"));
    }

    #[tokio::test]
    async fn test_empty_ids_are_ignored() {
        let engine = engine();
        assert_eq!(
            engine.apply_recommendation_delta("", "r1").await,
            RecommendationOutcome::Ignored
        );
        assert_eq!(
            engine.apply_recommendation_delta("e1", "").await,
            RecommendationOutcome::Ignored
        );
    }

    #[test]
    fn test_mark_loaded_reports_first_call_only() {
        let engine = engine();
        assert!(!engine.has_loaded());
        assert!(engine.mark_loaded());
        assert!(!engine.mark_loaded());
        assert!(engine.has_loaded());
    }
}
