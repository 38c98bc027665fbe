//! External lookups feeding the directory
//!
//! - `address`: validation and normalization of entry addresses
//! - `enrichment`: info/reserves lookups with in-flight de-duplication
//! - `profiles`: lazy recommender profile lookups

pub mod address;
pub mod enrichment;
pub mod profiles;

pub use address::{normalize_address, resource_url, validate_address, AddressError};
pub use enrichment::{DedupFetcher, EnrichmentSource, FetchError, HttpEnrichmentFetcher};
pub use profiles::{
    HttpProfileSource, Profile, ProfileError, ProfileQueue, ProfileQueueSettings, ProfileSource,
};
