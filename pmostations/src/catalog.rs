//! Station catalog access
//!
//! The catalog is an external collaborator: it maps a station key to a
//! [`StationRecord`]. This module provides the [`StationCatalog`] trait plus
//! two implementations:
//!
//! - [`HttpStationCatalog`]: JSON documents served over HTTP
//! - [`StaticCatalog`]: an in-memory map, for tests and embedded catalogs
//!
//! # Example
//!
//! ```no_run
//! use pmostations::HttpStationCatalog;
//! use pmostations::StationCatalog;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = HttpStationCatalog::builder()
//!         .base_url("https://catalog.example.com")
//!         .build()?;
//!
//!     if let Some(station) = catalog.station("87.6").await? {
//!         println!("{} -> {}", station.name, station.url);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::models::StationRecord;
use reqwest::Client;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;

/// Default timeout for catalog requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "pmobroadcast/0.1 (pmostations)";

/// Access to the external station catalog
///
/// Implementations must be cheap to call concurrently; the broadcast engine
/// queries the catalog once per broadcast creation, never per session.
#[async_trait::async_trait]
pub trait StationCatalog: Send + Sync + 'static {
    /// Look up a single station by key
    ///
    /// Returns `Ok(None)` when the catalog has no entry for the key.
    async fn station(&self, key: &str) -> Result<Option<StationRecord>>;

    /// List every station in the catalog
    async fn stations(&self) -> Result<Vec<StationRecord>>;
}

// ============================================================================
// HTTP catalog
// ============================================================================

/// Station catalog served as JSON over HTTP
///
/// Expects `GET {base_url}/radios/{key}` to return a single record and
/// `GET {base_url}/radios` to return the full list. A 404 on the single
/// lookup maps to `Ok(None)`.
#[derive(Debug, Clone)]
pub struct HttpStationCatalog {
    client: Client,
    base_url: String,
}

impl HttpStationCatalog {
    /// Create a builder for configuring the catalog client
    pub fn builder() -> HttpStationCatalogBuilder {
        HttpStationCatalogBuilder::default()
    }

    /// Create a catalog with a custom `reqwest::Client`
    ///
    /// Useful for sharing HTTP connection pools with the rest of the engine.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn station_url(&self, key: &str) -> String {
        format!("{}/radios/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait::async_trait]
impl StationCatalog for HttpStationCatalog {
    async fn station(&self, key: &str) -> Result<Option<StationRecord>> {
        let url = self.station_url(key);
        tracing::debug!(key, url = %url, "Fetching station record");

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::catalog(format!(
                "catalog returned status {} for {}",
                response.status(),
                key
            )));
        }

        let record: StationRecord = response.json().await?;
        Ok(Some(record))
    }

    async fn stations(&self) -> Result<Vec<StationRecord>> {
        let url = format!("{}/radios", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::catalog(format!(
                "catalog returned status {} for station list",
                response.status()
            )));
        }

        let records: Vec<StationRecord> = response.json().await?;
        Ok(records)
    }
}

/// Builder for [`HttpStationCatalog`]
pub struct HttpStationCatalogBuilder {
    client: Option<Client>,
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpStationCatalogBuilder {
    fn default() -> Self {
        Self {
            client: None,
            base_url: String::new(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpStationCatalogBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the catalog base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the catalog client
    pub fn build(self) -> Result<HttpStationCatalog> {
        let client = if let Some(client) = self.client {
            client
        } else {
            Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?
        };

        Ok(HttpStationCatalog {
            client,
            base_url: self.base_url,
        })
    }
}

// ============================================================================
// Static catalog
// ============================================================================

/// In-memory station catalog
///
/// Used in tests and for small embedded catalogs that ship with the bot.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    records: HashMap<String, StationRecord>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of records, keyed by their `id`
    pub fn from_records(records: impl IntoIterator<Item = StationRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Insert or replace a record
    pub fn insert(&mut self, record: StationRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Number of stations in the catalog
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl StationCatalog for StaticCatalog {
    async fn station(&self, key: &str) -> Result<Option<StationRecord>> {
        Ok(self.records.get(key).cloned())
    }

    async fn stations(&self) -> Result<Vec<StationRecord>> {
        let mut records: Vec<StationRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_catalog_lookup() {
        let catalog = StaticCatalog::from_records([
            StationRecord::new("87.6", "Test FM", "http://example.com/stream"),
            StationRecord::new("101.1", "Jazz One", "http://example.com/jazz"),
        ]);

        let record = catalog.station("87.6").await.unwrap().unwrap();
        assert_eq!(record.name, "Test FM");
        assert!(catalog.station("99.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn static_catalog_lists_sorted_by_key() {
        let catalog = StaticCatalog::from_records([
            StationRecord::new("b", "B", "http://example.com/b"),
            StationRecord::new("a", "A", "http://example.com/a"),
        ]);

        let all = catalog.stations().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
    }

    #[test]
    fn station_url_strips_trailing_slash() {
        let catalog = HttpStationCatalog::builder()
            .base_url("http://catalog.example.com/")
            .build()
            .unwrap();
        assert_eq!(
            catalog.station_url("87.6"),
            "http://catalog.example.com/radios/87.6"
        );
    }
}
