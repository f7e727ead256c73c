//! Error types for the station catalog and resolver

/// Result type alias for station operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while querying the catalog or resolving a stream URL
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Catalog returned an error status
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Station not found in the catalog
    #[error("Station not found: {0}")]
    StationNotFound(String),

    /// Playlist document could not be fetched
    #[error("Playlist fetch failed for {url}: {reason}")]
    PlaylistFetch { url: String, reason: String },

    /// Playlist document contained no usable entry
    #[error("Playlist {0} contains no usable entry")]
    EmptyPlaylist(String),
}

impl Error {
    /// Create a catalog error from a string
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }
}
