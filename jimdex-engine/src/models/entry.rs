//! Directory entry and its enrichment state

use super::{RawRecord, ViewerContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display metadata served by an entry's info resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Capacity and reserve figures served by an entry's reserves resource
///
/// Known fields are typed; anything else the instance reports is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reserves {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_channels: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_outgoing_capacity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_channel_capacity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_apps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_app_balance: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_public_channels: Option<bool>,
    /// Unrecognized fields, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of a successful enrichment: both payloads or nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub metadata: Metadata,
    pub reserves: Reserves,
}

/// Enrichment lifecycle of an entry
///
/// Only `Enriched` entries are surfaced in snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentState {
    /// Fetch scheduled or in flight
    Pending,
    /// Both lookups succeeded
    Enriched(Enrichment),
    /// Last attempt failed; retried on the next announcement for the key
    Failed { reason: String },
}

impl EnrichmentState {
    pub fn is_enriched(&self) -> bool {
        matches!(self, EnrichmentState::Enriched(_))
    }

    pub fn enrichment(&self) -> Option<&Enrichment> {
        match self {
            EnrichmentState::Enriched(enrichment) => Some(enrichment),
            _ => None,
        }
    }
}

/// Per-recommender state stored on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recommender {
    /// Set once the viewer follows this recommender (or is them); never cleared
    pub mutual: bool,
}

/// One directory entry, keyed by the id of its announcement record
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub entry_id: String,
    pub address: String,
    pub source_record: RawRecord,
    pub enrichment: EnrichmentState,
    /// Unique by recommender id; ordered by id so merge order never shows
    pub recommenders: BTreeMap<String, Recommender>,
    /// Insertion order in the directory, used to break ranking ties
    pub seq: u64,
    /// Bumped for every scheduled enrichment attempt
    pub revision: u64,
}

impl Entry {
    pub fn new(entry_id: String, address: String, source_record: RawRecord, seq: u64) -> Self {
        Self {
            entry_id,
            address,
            source_record,
            enrichment: EnrichmentState::Pending,
            recommenders: BTreeMap::new(),
            seq,
            revision: 0,
        }
    }

    /// Add a recommender if not already present
    ///
    /// Returns `true` when the recommender is new. An existing recommender is
    /// left untouched, in particular its `mutual` bit.
    pub fn add_recommender(&mut self, recommender_id: &str, mutual: bool) -> bool {
        if self.recommenders.contains_key(recommender_id) {
            return false;
        }
        self.recommenders
            .insert(recommender_id.to_string(), Recommender { mutual });
        true
    }

    /// Flip a recommender to mutual; returns `true` if it was not mutual before
    pub fn mark_mutual(&mut self, recommender_id: &str) -> bool {
        match self.recommenders.get_mut(recommender_id) {
            Some(recommender) if !recommender.mutual => {
                recommender.mutual = true;
                true
            }
            _ => false,
        }
    }

    pub fn mutual_count(&self) -> usize {
        self.recommenders.values().filter(|r| r.mutual).count()
    }

    /// Mutual count as seen by `viewer`: stored bits plus the viewer's own view
    pub fn mutual_count_for(&self, viewer: Option<&ViewerContext>) -> usize {
        self.recommenders
            .iter()
            .filter(|(id, r)| is_mutual_for(id, r, viewer))
            .count()
    }

    /// Ranking score: mutual recommenders for a viewer, all recommenders otherwise
    pub fn rank_score(&self, viewer: Option<&ViewerContext>) -> usize {
        match viewer {
            Some(_) => self.mutual_count_for(viewer),
            None => self.recommenders.len(),
        }
    }

    /// Build the externally visible view, or `None` while not enriched
    pub fn view<F>(&self, viewer: Option<&ViewerContext>, display_name: F) -> Option<EntryView>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enrichment = self.enrichment.enrichment()?;
        let recommenders = self
            .recommenders
            .iter()
            .map(|(id, r)| RecommenderView {
                recommender_id: id.clone(),
                mutual: is_mutual_for(id, r, viewer),
                display_name: display_name(id),
            })
            .collect();

        Some(EntryView {
            entry_id: self.entry_id.clone(),
            address: self.address.clone(),
            metadata: enrichment.metadata.clone(),
            reserves: enrichment.reserves.clone(),
            recommenders,
            total_recommendations: self.recommenders.len(),
            mutual_recommendations: self.mutual_count_for(viewer),
            announced_at: self.source_record.created_at,
        })
    }
}

fn is_mutual_for(id: &str, recommender: &Recommender, viewer: Option<&ViewerContext>) -> bool {
    recommender.mutual || viewer.map_or(false, |v| v.is_mutual(id))
}

/// Recommender as shown in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommenderView {
    pub recommender_id: String,
    pub mutual: bool,
    /// Resolved display name, when a profile lookup succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Fully enriched entry as returned by snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryView {
    pub entry_id: String,
    pub address: String,
    pub metadata: Metadata,
    pub reserves: Reserves,
    pub recommenders: Vec<RecommenderView>,
    pub total_recommendations: usize,
    pub mutual_recommendations: usize,
    /// `created_at` of the current announcement record
    pub announced_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        let record = RawRecord {
            id: "e1".to_string(),
            pubkey: "author".to_string(),
            kind: 31678,
            created_at: 1_700_000_000,
            tags: vec![],
            content: String::new(),
        };
        Entry::new("e1".to_string(), "https://x.example".to_string(), record, 0)
    }

    #[test]
    fn test_new_entry_is_pending_and_hidden() {
        let e = entry();
        assert_eq!(e.enrichment, EnrichmentState::Pending);
        assert!(e.view(None, |_| None).is_none());
    }

    #[test]
    fn test_repeat_recommender_keeps_mutual() {
        let mut e = entry();
        assert!(e.add_recommender("r1", false));
        assert!(e.mark_mutual("r1"));
        assert!(!e.add_recommender("r1", false), "Repeat is a no-op");
        assert!(e.recommenders["r1"].mutual, "Repeat must not reset mutual");
        assert_eq!(e.recommenders.len(), 1);
    }

    #[test]
    fn test_mark_mutual_only_flips_once() {
        let mut e = entry();
        e.add_recommender("r1", false);
        assert!(e.mark_mutual("r1"));
        assert!(!e.mark_mutual("r1"));
        assert!(!e.mark_mutual("unknown"));
    }

    #[test]
    fn test_rank_score_filters_for_viewer() {
        let mut e = entry();
        e.add_recommender("a", true);
        e.add_recommender("b", false);
        e.add_recommender("c", false);
        assert_eq!(e.rank_score(None), 3);

        let stranger = ViewerContext::new("me", Vec::new());
        assert_eq!(e.rank_score(Some(&stranger)), 1);

        let follows_b = ViewerContext::new("me", vec!["b".to_string()]);
        assert_eq!(e.rank_score(Some(&follows_b)), 2);
    }

    #[test]
    fn test_view_reports_counts_and_names() {
        let mut e = entry();
        e.enrichment = EnrichmentState::Enriched(Enrichment {
            metadata: Metadata {
                name: Some("X".to_string()),
                ..Default::default()
            },
            reserves: Reserves::default(),
        });
        e.add_recommender("a", true);
        e.add_recommender("b", false);

        let view = e
            .view(None, |id| (id == "a").then(|| "Alice".to_string()))
            .expect("enriched entry is visible");
        assert_eq!(view.total_recommendations, 2);
        assert_eq!(view.mutual_recommendations, 1);
        assert_eq!(view.recommenders[0].display_name.as_deref(), Some("Alice"));
        assert_eq!(view.recommenders[1].display_name, None);
        assert_eq!(view.metadata.name.as_deref(), Some("X"));
    }

    #[test]
    fn test_reserves_keep_unknown_fields() {
        let reserves: Reserves = serde_json::from_str(
            r#"{"numChannels":3,"hasPublicChannels":true,"custom":"x"}"#,
        )
        .unwrap();
        assert_eq!(reserves.num_channels, Some(3));
        assert_eq!(reserves.has_public_channels, Some(true));
        assert_eq!(reserves.extra["custom"], "x");
    }
}
