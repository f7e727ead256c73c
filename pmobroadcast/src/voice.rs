//! Voice-connection boundary
//!
//! The chat platform's voice capability is an external collaborator. The
//! engine only needs three things from it: join a channel, play an audio
//! source on the resulting connection, and leave. Everything is expressed
//! as object-safe traits so the engine carries no dependency on any
//! particular platform client.

use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Identity of a consumer's voice channel (one guild, one channel)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelTarget {
    /// Guild the channel belongs to
    pub guild_id: String,
    /// Voice channel to join
    pub channel_id: String,
}

impl ChannelTarget {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl std::fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// What a connection is asked to play
pub enum AudioSource {
    /// The shared live feed fanned out by a broadcast; chunks are encoded
    /// audio bytes, one receiver per session
    Feed(broadcast::Receiver<Bytes>),
    /// A short, finite clip fetched from a URL (the "service error" tone)
    Clip(String),
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feed(_) => f.write_str("AudioSource::Feed"),
            Self::Clip(url) => write!(f, "AudioSource::Clip({})", url),
        }
    }
}

/// Events emitted by a connection about one playback
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The connection started or stopped transmitting audio
    Speaking(bool),
    /// The playback failed; the session should be torn down
    Error(String),
    /// The source finished (finite clips) or the connection went away
    Ended,
}

/// Receiver side of a playback's event stream
pub type PlaybackEvents = mpsc::Receiver<PlaybackEvent>;

/// Entry point into the platform's voice capability
#[async_trait::async_trait]
pub trait VoiceGateway: Send + Sync + 'static {
    /// Join a voice channel and return a handle to the live connection
    async fn join(&self, target: &ChannelTarget) -> Result<Arc<dyn VoiceConnection>>;
}

/// One live voice-channel connection
///
/// A connection belongs to exactly one session; the engine never shares it.
#[async_trait::async_trait]
pub trait VoiceConnection: Send + Sync + 'static {
    /// Start playing an audio source at the given bitrate (kbps)
    ///
    /// Returns the playback's event stream. Calling `play` again replaces
    /// the previous playback (used to switch a session from the live feed
    /// to the fallback clip).
    async fn play(&self, source: AudioSource, bitrate: u32) -> Result<PlaybackEvents>;

    /// Adjust this connection's output gain in [0, 1]
    async fn set_volume(&self, volume: f32) -> Result<()>;

    /// Leave the voice channel
    ///
    /// Must be idempotent: leaving an already-dead connection is a no-op.
    async fn leave(&self) -> Result<()>;
}
