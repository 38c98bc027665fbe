//! Authenticated viewer context

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity and follow set of the authenticated viewer
///
/// Absence (`Option::None` at call sites) means the anonymous viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerContext {
    pub viewer_id: String,
    #[serde(default)]
    pub follow_set: BTreeSet<String>,
}

impl ViewerContext {
    pub fn new(viewer_id: impl Into<String>, follows: impl IntoIterator<Item = String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            follow_set: follows.into_iter().collect(),
        }
    }

    /// Whether `recommender_id` counts as mutual for this viewer
    ///
    /// The viewer is always mutual with themself.
    pub fn is_mutual(&self, recommender_id: &str) -> bool {
        recommender_id == self.viewer_id || self.follow_set.contains(recommender_id)
    }
}
