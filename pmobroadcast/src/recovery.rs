//! Failure recovery
//!
//! When a broadcast's upstream breaks, every subscriber hears a short
//! "service error" clip instead of silence, is then disconnected from its
//! voice channel, and the broadcast is destroyed and unregistered. The
//! sequence runs once per failing broadcast and is bounded by the recovery
//! timeout, so a wedged voice backend cannot hang the engine.
//!
//! A consumer-initiated detach racing this sequence wins: sessions already
//! gone by the forced-disconnect step are skipped, never double-processed.

use crate::broadcast::Broadcast;
use crate::events::EngineEventKind;
use crate::manager::BroadcastManager;
use crate::session::Session;
use crate::voice::{AudioSource, PlaybackEvent, PlaybackEvents};
use std::sync::Arc;

impl BroadcastManager {
    /// Run the recovery sequence for a broadcast already in `Failing`
    pub(crate) async fn run_failure_recovery(&self, broadcast: Arc<Broadcast>) {
        let key = broadcast.station_key().to_string();
        let sessions = broadcast.sessions().await;

        // 1-2. Play the fallback clip to every attached session. A play
        // failure means the connection is already gone; that session is
        // treated as already-detached, not as an error.
        let mut waits: Vec<(Arc<Session>, Option<PlaybackEvents>)> = Vec::new();
        for session in &sessions {
            let playback = session
                .connection
                .play(
                    AudioSource::Clip(self.inner.config.error_clip_url.clone()),
                    self.inner.config.bitrate,
                )
                .await;
            match playback {
                Ok(events) => waits.push((session.clone(), Some(events))),
                Err(e) => {
                    tracing::debug!(
                        station = %key,
                        session = %session.id(),
                        error = %e,
                        "Connection already gone, skipping fallback clip"
                    );
                    waits.push((session.clone(), None));
                }
            }
        }

        if !sessions.is_empty() {
            self.emit(&key, None, EngineEventKind::FallbackClip);
        }

        // 3. Wait for the clips to finish, concurrently and bounded
        let timeout = self.inner.config.recovery_timeout();
        let completions = waits.iter_mut().map(|(session, events)| {
            let session_id = session.id();
            let key = key.clone();
            async move {
                let Some(events) = events.take() else { return };
                let wait = async {
                    let mut events = events;
                    while let Some(event) = events.recv().await {
                        if matches!(event, PlaybackEvent::Ended | PlaybackEvent::Error(_)) {
                            break;
                        }
                    }
                };
                if tokio::time::timeout(timeout, wait).await.is_err() {
                    tracing::warn!(
                        station = %key,
                        session = %session_id,
                        "Fallback clip did not finish in time"
                    );
                }
            }
        });
        futures::future::join_all(completions).await;

        // 4. Force-disconnect everyone still attached. `detach` on the
        // broadcast is idempotent, so a session the consumer detached in
        // the meantime is skipped here.
        for (session, _) in waits {
            let Some((session, _)) = broadcast.detach(session.id()).await else {
                continue;
            };
            session.set_speaking(false);
            let _ = session.connection.leave().await;

            {
                let mut guilds = self.inner.guild_sessions.write().await;
                let guild_id = &session.channel().guild_id;
                let matches_session = guilds
                    .get(guild_id)
                    .is_some_and(|h| h.session_id == session.id());
                if matches_session {
                    guilds.remove(guild_id);
                }
            }

            self.emit(&key, Some(session.id()), EngineEventKind::SessionEnded);
        }

        // 5. Destroy and unregister
        self.remove_entry(&key, &broadcast).await;
        broadcast.destroy().await;
        tracing::info!(station = %key, "Failed broadcast destroyed");
        self.emit(&key, None, EngineEventKind::BroadcastDestroyed);
    }
}
