//! Directory data model
//!
//! Plain data with invariant helpers; the merge logic lives in [`crate::engine`].

pub mod entry;
pub mod record;
pub mod viewer;

pub use entry::{
    Enrichment, EnrichmentState, Entry, EntryView, Metadata, Recommender, RecommenderView,
    Reserves,
};
pub use record::RawRecord;
pub use viewer::ViewerContext;
