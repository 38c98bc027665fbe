//! Event types for the Jimdex event system
//!
//! Provides the shared event definitions and the EventBus used to push
//! directory changes to collaborators that do not want to poll snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Viewer session phase as seen by event consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No viewer identity
    Anonymous,
    /// Waiting on the identity collaborator
    Authenticating,
    /// Viewer identity and follow set known
    Authenticated,
}

/// Jimdex event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JimdexEvent {
    /// First announcement seen for a new entry key
    ///
    /// Triggers:
    /// - Enrichment fetch for the entry address
    EntryDiscovered {
        entry_id: String,
        address: String,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment succeeded, entry is now visible in snapshots
    EntryEnriched {
        entry_id: String,
        address: String,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment failed, entry stays hidden until the next announcement
    EnrichmentFailed {
        entry_id: String,
        address: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A new recommender was merged into an entry
    RecommendationAdded {
        entry_id: String,
        recommender_id: String,
        mutual: bool,
        timestamp: DateTime<Utc>,
    },

    /// Mutuality was recomputed for the current viewer
    MutualityRecomputed {
        viewer_id: String,
        /// Recommenders that became mutual in this pass
        newly_mutual: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Viewer session changed phase
    SessionStateChanged {
        old_state: SessionPhase,
        new_state: SessionPhase,
        timestamp: DateTime<Utc>,
    },

    /// Stream bridges should discard and re-open their feeds
    FeedRestartRequested {
        /// Monotonic restart counter
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// Display profile resolved for a recommender
    ProfileResolved {
        recommender_id: String,
        display_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl JimdexEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            JimdexEvent::EntryDiscovered { .. } => "EntryDiscovered",
            JimdexEvent::EntryEnriched { .. } => "EntryEnriched",
            JimdexEvent::EnrichmentFailed { .. } => "EnrichmentFailed",
            JimdexEvent::RecommendationAdded { .. } => "RecommendationAdded",
            JimdexEvent::MutualityRecomputed { .. } => "MutualityRecomputed",
            JimdexEvent::SessionStateChanged { .. } => "SessionStateChanged",
            JimdexEvent::FeedRestartRequested { .. } => "FeedRestartRequested",
            JimdexEvent::ProfileResolved { .. } => "ProfileResolved",
        }
    }
}

/// Central event distribution bus
///
/// Cloning is cheap; all clones share the same broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JimdexEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    ///
    /// # Examples
    ///
    /// ```
    /// use jimdex_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(1000);
    /// assert_eq!(event_bus.capacity(), 1000);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JimdexEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: JimdexEvent,
    ) -> Result<usize, broadcast::error::SendError<JimdexEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Directory notifications are advisory: snapshots stay the source of truth.
    pub fn emit_lossy(&self, event: JimdexEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
