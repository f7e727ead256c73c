//! Audio broadcast fan-out engine
//!
//! One upstream radio stream, any number of downstream playback sessions:
//! the engine deduplicates upstream connections per station key, fans the
//! audio out to every attached voice channel, and turns upstream failures
//! into a bounded, user-visible recovery sequence instead of a silent hang.
//!
//! # Architecture
//!
//! - [`BroadcastManager`] — the registry: station key → [`Broadcast`],
//!   at most one live broadcast per key, idle reclamation
//! - [`Broadcast`] — one active upstream stream and its session set
//! - [`Session`] — one consumer's attachment, with an independent volume
//! - failure recovery — fallback clip, forced disconnect, teardown
//!
//! Station resolution (catalog lookup, playlist indirection) lives in the
//! `pmostations` crate; the chat platform's voice capability is consumed
//! through the [`VoiceGateway`]/[`VoiceConnection`] traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmobroadcast::{BroadcastManager, ChannelTarget, EngineConfig};
//! use pmostations::{StationResolver, HttpStationCatalog};
//! # use pmobroadcast::VoiceGateway;
//! # async fn example(gateway: Arc<dyn VoiceGateway>) -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = HttpStationCatalog::builder()
//!     .base_url("https://catalog.example.com")
//!     .build()?;
//! let resolver = StationResolver::new(Arc::new(catalog));
//!
//! let manager = BroadcastManager::builder(resolver, gateway)
//!     .config(EngineConfig::default())
//!     .build();
//!
//! let session = manager
//!     .tune("87.6", ChannelTarget::new("guild-1", "voice-1"))
//!     .await?;
//! manager.set_volume(&session, 0.8).await?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod manager;
mod recovery;
pub mod session;
pub mod voice;

pub use broadcast::{Broadcast, BroadcastSnapshot, BroadcastState};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{EngineEvent, EngineEventEnvelope, EngineEventKind};
pub use fetch::{ChunkStream, FetchError, HttpStreamFetcher, StreamFetcher};
pub use manager::{BroadcastManager, BroadcastManagerBuilder};
pub use session::{Session, SessionHandle, SessionId, SessionSnapshot};
pub use voice::{
    AudioSource, ChannelTarget, PlaybackEvent, PlaybackEvents, VoiceConnection, VoiceGateway,
};
