//! Engine event stream
//!
//! Post-`tune` happenings (playback started, upstream failed, session
//! ended…) never surface as call errors; they are published on a broadcast
//! channel the command layer can subscribe to. Envelopes carry a timestamp
//! so slow consumers can tell stale events apart.

use crate::session::SessionId;
use serde::Serialize;
use std::time::SystemTime;

/// One engine event
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    /// Station key the event relates to
    pub station_key: String,
    /// Session the event relates to, when session-scoped
    pub session_id: Option<SessionId>,
    /// What happened
    pub kind: EngineEventKind,
}

/// Event variants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEventKind {
    /// A session was attached to a broadcast
    Tuned { station_name: String },
    /// The session's playback transmitted audio for the first time
    NowPlaying { station_name: String },
    /// The session's speaking state changed
    Speaking(bool),
    /// The session's playback failed; the session is being detached
    PlaybackError(String),
    /// The session was detached (explicit stop, channel-leave, or sweep)
    SessionEnded,
    /// The broadcast's upstream stream broke; failure recovery is running
    UpstreamFailed(String),
    /// The fallback clip is being played to the broadcast's sessions
    FallbackClip,
    /// The broadcast was destroyed and unregistered
    BroadcastDestroyed,
}

/// Envelope published on the event channel
#[derive(Debug, Clone, Serialize)]
pub struct EngineEventEnvelope {
    pub event: EngineEvent,
    pub timestamp: SystemTime,
}

impl EngineEventEnvelope {
    pub(crate) fn now(event: EngineEvent) -> Self {
        Self {
            event,
            timestamp: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_stamps_current_time() {
        let before = SystemTime::now();
        let envelope = EngineEventEnvelope::now(EngineEvent {
            station_key: "87.6".into(),
            session_id: None,
            kind: EngineEventKind::BroadcastDestroyed,
        });
        assert!(envelope.timestamp >= before);
    }

    #[test]
    fn events_serialize() {
        let envelope = EngineEventEnvelope::now(EngineEvent {
            station_key: "87.6".into(),
            session_id: None,
            kind: EngineEventKind::UpstreamFailed("connection reset".into()),
        });
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("UpstreamFailed"));
    }
}
