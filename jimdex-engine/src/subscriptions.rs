//! Stream subscriptions and the ingest loop
//!
//! Feeds deliver raw records at least once, unordered and possibly
//! duplicated. The ingest loop classifies each record into a delta and hands
//! it to the engine. Transport is out of scope: external bridges push records
//! into [`ChannelSubscriptions`] and watch for `FeedRestartRequested` events.

use crate::engine::{AnnouncementOutcome, ReconciliationEngine, RecommendationOutcome};
use crate::models::RawRecord;
use async_trait::async_trait;
use chrono::Utc;
use jimdex_common::config::RecordsConfig;
use jimdex_common::events::{EventBus, JimdexEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Most records taken off the queue before a batch is considered complete
const MAX_BATCH: usize = 256;

/// Quiet period after which an empty feed counts as loaded
pub const IDLE_LOAD_AFTER: Duration = Duration::from_millis(500);

/// Tag naming the kind a recommendation applies to
const KIND_TAG: &str = "k";

/// Collaborator owning the feed subscriptions
#[async_trait]
pub trait StreamSubscriptions: Send + Sync {
    /// Drop and re-open all feeds
    async fn restart(&self) -> anyhow::Result<()>;
}

/// A raw record interpreted as a directory change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Announcement {
        entry_id: String,
        address: String,
        record: RawRecord,
    },
    Recommendation {
        entry_id: String,
        recommender_id: String,
    },
}

/// Why a raw record was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("record {record_id} has unrelated kind {kind}")]
    UnrelatedKind { record_id: String, kind: u32 },

    #[error("record {record_id} has no '{tag}' tag")]
    MissingTag {
        record_id: String,
        tag: &'static str,
    },

    #[error("recommendation {record_id} targets kind {found:?}, not {expected}")]
    WrongTargetKind {
        record_id: String,
        expected: u32,
        found: Option<String>,
    },
}

/// Interpret a raw record
///
/// Announcements carry the address in their `d` tag and are keyed by their
/// own id. Recommendations carry the announcement kind in their `k` tag and
/// the target entry id in their `d` tag; the author is the recommender.
pub fn classify(record: RawRecord, kinds: &RecordsConfig) -> Result<Delta, ClassifyError> {
    if record.kind == kinds.announcement_kind {
        let address = record
            .d_tag()
            .ok_or_else(|| ClassifyError::MissingTag {
                record_id: record.id.clone(),
                tag: "d",
            })?
            .to_string();
        return Ok(Delta::Announcement {
            entry_id: record.id.clone(),
            address,
            record,
        });
    }

    if record.kind == kinds.recommendation_kind {
        let expected = kinds.announcement_kind.to_string();
        let found = record.tag_value(KIND_TAG);
        if found != Some(expected.as_str()) {
            return Err(ClassifyError::WrongTargetKind {
                record_id: record.id.clone(),
                expected: kinds.announcement_kind,
                found: found.map(str::to_string),
            });
        }
        let entry_id = record.d_tag().ok_or_else(|| ClassifyError::MissingTag {
            record_id: record.id.clone(),
            tag: "d",
        })?;
        return Ok(Delta::Recommendation {
            entry_id: entry_id.to_string(),
            recommender_id: record.pubkey.clone(),
        });
    }

    Err(ClassifyError::UnrelatedKind {
        record_id: record.id,
        kind: record.kind,
    })
}

/// Result of applying one raw record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Announcement(AnnouncementOutcome),
    Recommendation(RecommendationOutcome),
}

/// Classify `record` and merge it into the engine
pub async fn apply_record(
    engine: &ReconciliationEngine,
    record: RawRecord,
    kinds: &RecordsConfig,
) -> Result<ApplyOutcome, ClassifyError> {
    let outcome = match classify(record, kinds)? {
        Delta::Announcement {
            entry_id,
            address,
            record,
        } => ApplyOutcome::Announcement(
            engine
                .apply_announcement_delta(&entry_id, &address, record)
                .await,
        ),
        Delta::Recommendation {
            entry_id,
            recommender_id,
        } => ApplyOutcome::Recommendation(
            engine
                .apply_recommendation_delta(&entry_id, &recommender_id)
                .await,
        ),
    };
    Ok(outcome)
}

/// Counters reported when the ingest loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub announcements: u64,
    pub recommendations: u64,
    pub skipped: u64,
}

/// Consume raw records until the channel closes or `cancel` fires
///
/// The engine is marked loaded after the first batch, i.e. once the queue
/// has been drained for the first time, or once the feed has stayed empty
/// for [`IDLE_LOAD_AFTER`].
pub async fn run_ingest(
    engine: ReconciliationEngine,
    mut receiver: mpsc::Receiver<RawRecord>,
    kinds: RecordsConfig,
    cancel: CancellationToken,
) -> IngestStats {
    let mut stats = IngestStats::default();
    info!(
        announcement_kind = kinds.announcement_kind,
        recommendation_kind = kinds.recommendation_kind,
        "Ingest loop started"
    );

    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            record = receiver.recv() => match record {
                Some(record) => record,
                None => break,
            },
            _ = tokio::time::sleep(IDLE_LOAD_AFTER), if !engine.has_loaded() => {
                debug!("Feed idle, treating initial load as complete");
                engine.mark_loaded();
                continue;
            }
        };

        let mut batch = Vec::with_capacity(16);
        batch.push(first);
        while batch.len() < MAX_BATCH {
            match receiver.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }

        for record in batch {
            stats.received += 1;
            let record_id = record.id.clone();
            match apply_record(&engine, record, &kinds).await {
                Ok(ApplyOutcome::Announcement(_)) => stats.announcements += 1,
                Ok(ApplyOutcome::Recommendation(_)) => stats.recommendations += 1,
                Err(e) => {
                    stats.skipped += 1;
                    debug!(record_id = %record_id, error = %e, "Skipping record");
                }
            }
        }

        engine.mark_loaded();
    }

    info!(
        received = stats.received,
        announcements = stats.announcements,
        recommendations = stats.recommendations,
        skipped = stats.skipped,
        "Ingest loop stopped"
    );
    stats
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("ingest queue is full")]
    QueueFull,

    #[error("ingest loop has stopped")]
    Closed,
}

/// In-process feed: bridges push records, restarts are announced on the bus
pub struct ChannelSubscriptions {
    sender: mpsc::Sender<RawRecord>,
    generation: AtomicU64,
    event_bus: EventBus,
}

impl ChannelSubscriptions {
    /// Create the feed and the receiver to hand to [`run_ingest`]
    pub fn channel(capacity: usize, event_bus: EventBus) -> (Self, mpsc::Receiver<RawRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                generation: AtomicU64::new(0),
                event_bus,
            },
            receiver,
        )
    }

    /// Queue a record without waiting
    pub fn try_submit(&self, record: RawRecord) -> Result<(), SubmitError> {
        self.sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Queue a record, waiting for room
    pub async fn submit(&self, record: RawRecord) -> Result<(), SubmitError> {
        self.sender
            .send(record)
            .await
            .map_err(|_| SubmitError::Closed)
    }

    /// Number of restarts so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StreamSubscriptions for ChannelSubscriptions {
    async fn restart(&self) -> anyhow::Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, "Requesting feed restart");
        self.event_bus
            .emit_lossy(JimdexEvent::FeedRestartRequested {
                generation,
                timestamp: Utc::now(),
            });
        Ok(())
    }
}
