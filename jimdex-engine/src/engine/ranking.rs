//! Snapshot ordering

use crate::models::{Entry, ViewerContext};
use std::cmp::Reverse;

/// Visible entries ordered by rank score (descending), ties by insertion order
pub fn rank<'a, I>(entries: I, viewer: Option<&ViewerContext>) -> Vec<&'a Entry>
where
    I: IntoIterator<Item = &'a Entry>,
{
    let mut visible: Vec<(usize, &Entry)> = entries
        .into_iter()
        .filter(|entry| entry.enrichment.is_enriched())
        .map(|entry| (entry.rank_score(viewer), entry))
        .collect();

    visible.sort_by_key(|(score, entry)| (Reverse(*score), entry.seq));
    visible.into_iter().map(|(_, entry)| entry).collect()
}
