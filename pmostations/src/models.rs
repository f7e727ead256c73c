//! Data models for station catalog documents

use serde::{Deserialize, Serialize};

/// A station record as stored in the external catalog
///
/// The `id` is the opaque station key used to deduplicate broadcasts
/// (historically a frequency string such as `"87.6"`). Only `id`, `name`
/// and `url` are required; the rest is display metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationRecord {
    /// Opaque station key (e.g. a frequency string)
    pub id: String,
    /// Human-readable station name
    pub name: String,
    /// Stream URL; may point to a `.pls`/`.m3u` playlist document
    pub url: String,
    /// Station website
    #[serde(default)]
    pub website: Option<String>,
    /// Broadcast language
    #[serde(default)]
    pub language: Option<String>,
    /// Country of origin
    #[serde(default)]
    pub country: Option<String>,
    /// Programme genres
    #[serde(default)]
    pub genres: Vec<String>,
    /// Logo asset identifier
    #[serde(default)]
    pub logo: Option<String>,
    /// Marked broken by the catalog maintainers
    #[serde(default)]
    pub broken: bool,
}

impl StationRecord {
    /// Create a minimal record with just key, name and stream URL
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            website: None,
            language: None,
            country: None,
            genres: Vec::new(),
            logo: None,
            broken: false,
        }
    }
}

/// A station whose stream URL has been resolved to a directly playable URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStation {
    /// The catalog record the resolution started from
    pub record: StationRecord,
    /// Direct media URL (playlist indirections already followed)
    pub stream_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_deserializes_with_defaults() {
        let json = r#"{"id":"87.6","name":"Test FM","url":"http://example.com/stream"}"#;
        let record: StationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "87.6");
        assert_eq!(record.name, "Test FM");
        assert!(!record.broken);
        assert!(record.genres.is_empty());
    }

    #[test]
    fn record_deserializes_full_document() {
        let json = r#"{
            "id": "101.1",
            "name": "Jazz One",
            "url": "http://example.com/listen.pls",
            "website": "https://jazz.example.com",
            "language": "English",
            "country": "UK",
            "genres": ["jazz", "blues"],
            "logo": "jazzone",
            "broken": false
        }"#;
        let record: StationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.genres.len(), 2);
        assert_eq!(record.website.as_deref(), Some("https://jazz.example.com"));
    }
}
