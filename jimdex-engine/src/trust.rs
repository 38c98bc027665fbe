//! Trust resolution: which recommenders are mutual for the viewer
//!
//! A recommender is mutual when the viewer follows them or is them. The
//! `mutual` bit only ever goes from false to true; dropping a follow does not
//! revoke it.

use crate::models::{Entry, ViewerContext};
use std::collections::BTreeSet;

/// Outcome of one mutuality pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutualityChange {
    /// Recommenders flipped to mutual in this pass (on at least one entry)
    pub newly_mutual: BTreeSet<String>,
    /// Number of entries with at least one flipped recommender
    pub entries_changed: usize,
}

impl MutualityChange {
    pub fn is_empty(&self) -> bool {
        self.newly_mutual.is_empty()
    }
}

/// Re-scan every recommender of every entry against `viewer`
pub fn recompute_mutuality<'a, I>(entries: I, viewer: &ViewerContext) -> MutualityChange
where
    I: IntoIterator<Item = &'a mut Entry>,
{
    let mut change = MutualityChange::default();

    for entry in entries {
        let candidates: Vec<String> = entry
            .recommenders
            .iter()
            .filter(|(id, r)| !r.mutual && viewer.is_mutual(id))
            .map(|(id, _)| id.clone())
            .collect();

        if candidates.is_empty() {
            continue;
        }

        for id in candidates {
            if entry.mark_mutual(&id) {
                change.newly_mutual.insert(id);
            }
        }
        change.entries_changed += 1;
    }

    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;

    fn entry(id: &str, recommenders: &[(&str, bool)]) -> Entry {
        let record = RawRecord {
            id: id.to_string(),
            pubkey: "author".to_string(),
            kind: 31678,
            created_at: 0,
            tags: vec![],
            content: String::new(),
        };
        let mut e = Entry::new(id.to_string(), "https://x.example".to_string(), record, 0);
        for (r, mutual) in recommenders {
            e.add_recommender(r, *mutual);
        }
        e
    }

    #[test]
    fn test_follows_and_self_become_mutual() {
        let mut entries = vec![
            entry("a", &[("alice", false), ("bob", false)]),
            entry("b", &[("me", false), ("alice", false)]),
        ];
        let viewer = ViewerContext::new("me", vec!["alice".to_string()]);

        let change = recompute_mutuality(entries.iter_mut(), &viewer);

        assert_eq!(
            change.newly_mutual,
            ["alice", "me"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(change.entries_changed, 2);
        assert!(entries[0].recommenders["alice"].mutual);
        assert!(!entries[0].recommenders["bob"].mutual);
        assert!(entries[1].recommenders["me"].mutual);
    }

    #[test]
    fn test_mutual_is_never_revoked() {
        let mut entries = vec![entry("a", &[("alice", true)])];
        let viewer = ViewerContext::new("me", Vec::new());

        let change = recompute_mutuality(entries.iter_mut(), &viewer);

        assert!(change.is_empty());
        assert!(entries[0].recommenders["alice"].mutual, "true must stay true");
    }

    #[test]
    fn test_second_pass_reports_nothing_new() {
        let mut entries = vec![entry("a", &[("alice", false)])];
        let viewer = ViewerContext::new("me", vec!["alice".to_string()]);

        assert!(!recompute_mutuality(entries.iter_mut(), &viewer).is_empty());
        assert!(recompute_mutuality(entries.iter_mut(), &viewer).is_empty());
    }
}
