//! Listening sessions
//!
//! A session is one consumer's attachment to a broadcast: the voice
//! connection, an independent volume, a start timestamp and a speaking
//! flag. Sessions are owned by their broadcast; callers only ever hold a
//! [`SessionHandle`], a non-owning (key, id) pair that stays valid to pass
//! around after the session is gone.

use crate::voice::{ChannelTarget, VoiceConnection};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Engine-wide unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-owning reference to a session, handed to the command layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// Station key of the broadcast the session was attached to
    pub station_key: String,
    /// Identifier of the session within the engine
    pub session_id: SessionId,
}

/// One consumer's attachment to a broadcast
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) channel: ChannelTarget,
    pub(crate) connection: Arc<dyn VoiceConnection>,
    volume: RwLock<f32>,
    started_at: Instant,
    speaking: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        channel: ChannelTarget,
        connection: Arc<dyn VoiceConnection>,
        volume: f32,
    ) -> Self {
        Self {
            id,
            channel,
            connection,
            volume: RwLock::new(volume),
            started_at: Instant::now(),
            speaking: AtomicBool::new(false),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Voice channel this session plays into
    pub fn channel(&self) -> &ChannelTarget {
        &self.channel
    }

    /// Current volume in [0, 1]
    pub fn volume(&self) -> f32 {
        *self.volume.read().expect("volume lock poisoned")
    }

    pub(crate) fn set_volume(&self, volume: f32) {
        *self.volume.write().expect("volume lock poisoned") = volume;
    }

    /// Time since the session was attached
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the connection is currently transmitting audio
    pub fn speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    pub(crate) fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Relaxed);
    }

    /// Read-only copy for diagnostics
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            guild_id: self.channel.guild_id.clone(),
            channel_id: self.channel.channel_id.clone(),
            volume: self.volume(),
            elapsed_secs: self.elapsed().as_secs(),
            speaking: self.speaking(),
        }
    }
}

/// Diagnostic copy of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub guild_id: String,
    pub channel_id: String,
    pub volume: f32,
    pub elapsed_secs: u64,
    pub speaking: bool,
}
