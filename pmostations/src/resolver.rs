//! Stream URL resolution
//!
//! Catalog records sometimes point at a playlist document (`.pls`/`.m3u`)
//! instead of the stream itself. The [`StationResolver`] follows that
//! indirection once, at broadcast-creation time, and hands back a directly
//! playable URL.

use crate::catalog::StationCatalog;
use crate::error::{Error, Result};
use crate::models::ResolvedStation;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Playlist formats detected by file-extension convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    Pls,
    M3u,
}

/// Detect a playlist indirection from a URL
///
/// The query string is stripped before looking at the extension, so
/// `http://host/listen.pls?sid=1` is recognized. `.m3u8` (HLS) is *not* a
/// playlist indirection and passes through untouched.
pub fn detect_playlist_format(url: &str) -> Option<PlaylistFormat> {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".pls") {
        Some(PlaylistFormat::Pls)
    } else if path.ends_with(".m3u") {
        Some(PlaylistFormat::M3u)
    } else {
        None
    }
}

/// Extract the first usable media URL from a playlist document
pub fn parse_playlist(format: PlaylistFormat, body: &str) -> Option<String> {
    match format {
        PlaylistFormat::Pls => body
            .lines()
            .map(str::trim)
            .filter(|line| {
                let lower = line.to_ascii_lowercase();
                lower.starts_with("file") && line.contains('=')
            })
            .filter_map(|line| line.splitn(2, '=').nth(1))
            .map(str::trim)
            .find(|url| !url.is_empty())
            .map(str::to_string),
        PlaylistFormat::M3u => body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string),
    }
}

/// Resolves a station key to a directly playable stream URL
///
/// Stateless apart from its catalog handle and HTTP client; safe to share
/// across concurrent `tune` requests.
#[derive(Clone)]
pub struct StationResolver {
    catalog: Arc<dyn StationCatalog>,
    client: Client,
}

impl StationResolver {
    /// Create a resolver over a catalog
    pub fn new(catalog: Arc<dyn StationCatalog>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(crate::catalog::DEFAULT_REQUEST_TIMEOUT_SECS))
            .user_agent(crate::catalog::DEFAULT_USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { catalog, client }
    }

    /// Create a resolver with a custom HTTP client for playlist fetches
    pub fn with_client(catalog: Arc<dyn StationCatalog>, client: Client) -> Self {
        Self { catalog, client }
    }

    /// Resolve a station key to a playable stream URL
    ///
    /// Fails with [`Error::StationNotFound`] when the catalog has no entry,
    /// or with a playlist error when the indirection cannot be followed.
    pub async fn resolve(&self, key: &str) -> Result<ResolvedStation> {
        let record = self
            .catalog
            .station(key)
            .await?
            .ok_or_else(|| Error::StationNotFound(key.to_string()))?;

        let stream_url = match detect_playlist_format(&record.url) {
            Some(format) => {
                tracing::debug!(key, url = %record.url, ?format, "Following playlist indirection");
                self.fetch_first_entry(&record.url, format).await?
            }
            None => record.url.clone(),
        };

        tracing::info!(key, station = %record.name, stream = %stream_url, "Station resolved");
        Ok(ResolvedStation { record, stream_url })
    }

    async fn fetch_first_entry(&self, url: &str, format: PlaylistFormat) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::PlaylistFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::PlaylistFetch {
                url: url.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| Error::PlaylistFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        parse_playlist(format, &body).ok_or_else(|| Error::EmptyPlaylist(url.to_string()))
    }
}
