//! Enrichment fetcher
//!
//! Looks up an entry's info and reserves resources. Both lookups must succeed
//! for the enrichment to succeed; nothing partial is ever returned.
//!
//! [`DedupFetcher`] wraps any [`EnrichmentSource`] so that concurrent requests
//! for the same address share a single in-flight fetch, and bounds every fetch
//! with a timeout.

use crate::config::FetcherSettings;
use crate::models::{Enrichment, Metadata, Reserves};
use crate::services::address::resource_url;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Enrichment failure; the entry stays hidden until the next attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("unparseable payload from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("enrichment timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Source of enrichment data for an entry address
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Fetch metadata and reserves for `address`
    async fn fetch(&self, address: &str) -> Result<Enrichment, FetchError>;
}

/// HTTP implementation: `GET {address}/{info_path}` and `GET {address}/{reserves_path}`
pub struct HttpEnrichmentFetcher {
    http_client: reqwest::Client,
    info_path: String,
    reserves_path: String,
}

impl HttpEnrichmentFetcher {
    pub fn new(settings: &FetcherSettings) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            info_path: settings.info_path.clone(),
            reserves_path: settings.reserves_path.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!(url = %url, "Fetching enrichment resource");

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl EnrichmentSource for HttpEnrichmentFetcher {
    async fn fetch(&self, address: &str) -> Result<Enrichment, FetchError> {
        let info_url = resource_url(address, &self.info_path)
            .map_err(|e| FetchError::InvalidAddress(e.to_string()))?;
        let reserves_url = resource_url(address, &self.reserves_path)
            .map_err(|e| FetchError::InvalidAddress(e.to_string()))?;

        let (metadata, reserves) = tokio::try_join!(
            self.get_json::<Metadata>(info_url),
            self.get_json::<Reserves>(reserves_url),
        )?;

        info!(
            address = %address,
            name = %metadata.name.as_deref().unwrap_or("<unnamed>"),
            "Retrieved enrichment"
        );

        Ok(Enrichment { metadata, reserves })
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Enrichment, FetchError>>>;

/// At-most-one in-flight fetch per address, bounded by a timeout
///
/// A second request for an address already being fetched awaits the first
/// request's result instead of starting new network work.
#[derive(Clone)]
pub struct DedupFetcher {
    source: Arc<dyn EnrichmentSource>,
    timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl DedupFetcher {
    pub fn new(source: Arc<dyn EnrichmentSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of addresses with a fetch currently in flight
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    fn start(&self, address: &str) -> SharedFetch {
        let source = Arc::clone(&self.source);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;
        let address = address.to_string();

        async move {
            let result = match tokio::time::timeout(timeout, source.fetch(&address)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout)),
            };
            // The map entry is only ever this future while it runs
            in_flight.lock().await.remove(&address);
            result
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl EnrichmentSource for DedupFetcher {
    async fn fetch(&self, address: &str) -> Result<Enrichment, FetchError> {
        let fetch = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(address) {
                Some(existing) => {
                    debug!(address = %address, "Joining in-flight enrichment fetch");
                    existing.clone()
                }
                None => {
                    let fetch = self.start(address);
                    in_flight.insert(address.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl EnrichmentSource for SlowSource {
        async fn fetch(&self, address: &str) -> Result<Enrichment, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Enrichment {
                metadata: Metadata {
                    name: Some(address.to_string()),
                    ..Default::default()
                },
                reserves: Reserves::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_call() {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let fetcher = DedupFetcher::new(source.clone(), Duration::from_secs(5));

        let (a, b) = tokio::join!(
            fetcher.fetch("https://x.example"),
            fetcher.fetch("https://x.example")
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_different_addresses_fetch_independently() {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(10),
        });
        let fetcher = DedupFetcher::new(source.clone(), Duration::from_secs(5));

        let (a, b) = tokio::join!(
            fetcher.fetch("https://a.example"),
            fetcher.fetch("https://b.example")
        );

        assert_eq!(a.unwrap().metadata.name.as_deref(), Some("https://a.example"));
        assert_eq!(b.unwrap().metadata.name.as_deref(), Some("https://b.example"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_fetches_are_not_cached() {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let fetcher = DedupFetcher::new(source.clone(), Duration::from_secs(5));

        fetcher.fetch("https://x.example").await.unwrap();
        fetcher.fetch("https://x.example").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_fetch_error() {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(10),
        });
        let fetcher = DedupFetcher::new(source, Duration::from_millis(20));

        let result = fetcher.fetch("https://x.example").await;
        assert_eq!(result, Err(FetchError::Timeout(Duration::from_millis(20))));
        assert_eq!(fetcher.in_flight_count().await, 0);
    }
}
