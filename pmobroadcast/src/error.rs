//! Error types for the broadcast engine

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the engine's public operations
///
/// Post-attach upstream failures are *not* represented here: they happen
/// after `tune` has already returned and are reported through the engine
/// event stream while the failure-recovery sequence runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The catalog has no entry for the requested station key
    #[error("Unknown station: {0}")]
    UnknownStation(String),

    /// Resolution or connection to the upstream source failed
    #[error("Upstream unreachable for station {key}: {reason}")]
    UpstreamUnreachable { key: String, reason: String },

    /// The broadcast service is administratively disabled
    #[error("Broadcast service is disabled")]
    ServiceDisabled,

    /// Volume outside the [0, 1] range
    #[error("Invalid volume {0} (expected 0.0..=1.0)")]
    InvalidVolume(f32),

    /// The session handle no longer refers to a live session
    #[error("Session {session_id} on station {key} no longer exists")]
    SessionNotFound { key: String, session_id: u64 },

    /// Joining or driving the voice channel failed
    #[error("Voice connection error: {0}")]
    VoiceConnection(String),
}

impl Error {
    /// Map a station-layer error onto the engine taxonomy for a given key
    ///
    /// Catalog misses become [`Error::UnknownStation`]; every other
    /// resolution failure is an unreachable upstream.
    pub fn from_station(key: &str, err: pmostations::Error) -> Self {
        match err {
            pmostations::Error::StationNotFound(_) => Self::UnknownStation(key.to_string()),
            other => Self::UpstreamUnreachable {
                key: key.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Create a voice connection error from a string
    pub fn voice(msg: impl Into<String>) -> Self {
        Self::VoiceConnection(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_errors_map_onto_taxonomy() {
        let err = Error::from_station("87.6", pmostations::Error::StationNotFound("87.6".into()));
        assert!(matches!(err, Error::UnknownStation(_)));

        let err = Error::from_station(
            "87.6",
            pmostations::Error::EmptyPlaylist("http://x/listen.pls".into()),
        );
        assert!(matches!(err, Error::UpstreamUnreachable { .. }));
    }
}
