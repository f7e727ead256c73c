//! Upstream stream fetching
//!
//! A broadcast owns exactly one upstream fetch. The [`StreamFetcher`] trait
//! hides the transport so tests can feed synthetic chunks; the default
//! implementation streams bytes over HTTP with `reqwest`, which is how web
//! radios (Icecast/Shoutcast and friends) are served.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

/// A live stream of encoded audio chunks
///
/// An `Err` item or the end of the stream both mean the upstream is gone:
/// a web radio never ends cleanly.
pub type ChunkStream = BoxStream<'static, std::result::Result<Bytes, FetchError>>;

/// Transport-level failure while connecting to or reading an upstream
///
/// The manager maps this onto `Error::UpstreamUnreachable` (at connect time)
/// or into the failure-recovery path (mid-stream).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct FetchError(pub String);

/// Opens upstream audio streams
#[async_trait::async_trait]
pub trait StreamFetcher: Send + Sync + 'static {
    /// Connect to the stream URL and return its chunk stream
    async fn open(&self, url: &str) -> std::result::Result<ChunkStream, FetchError>;
}

/// HTTP stream fetcher (reqwest, chunked transfer)
#[derive(Debug, Clone)]
pub struct HttpStreamFetcher {
    client: Client,
}

/// Connect timeout for upstream requests (10 seconds)
///
/// No overall request timeout: the stream is expected to run forever.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

impl HttpStreamFetcher {
    /// Create a fetcher with its own HTTP client
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Create a fetcher sharing an existing HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpStreamFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StreamFetcher for HttpStreamFetcher {
    async fn open(&self, url: &str) -> std::result::Result<ChunkStream, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError(format!("HTTP request failed for {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(FetchError(format!(
                "HTTP request returned status {} for {}",
                response.status(),
                url
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(|e| FetchError(e.to_string())))
            .boxed();
        Ok(stream)
    }
}
