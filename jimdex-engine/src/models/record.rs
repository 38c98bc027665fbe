//! Raw signed records as delivered by the feeds
//!
//! Signature verification happens upstream; records arriving here are trusted.

use serde::{Deserialize, Serialize};

/// One raw record from an announcement or recommendation feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Record id (hex digest assigned by the network)
    pub id: String,
    /// Author identity
    pub pubkey: String,
    /// Record kind
    pub kind: u32,
    /// Unix timestamp (seconds)
    #[serde(default)]
    pub created_at: i64,
    /// Tags as `[name, value, ...]` arrays
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
}

impl RawRecord {
    /// First value of the first tag named `name`
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Value of the `d` (identifier) tag
    pub fn d_tag(&self) -> Option<&str> {
        self.tag_value("d")
    }
}
