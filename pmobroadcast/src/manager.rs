//! BroadcastManager: the coordinating registry
//!
//! Maps station key → broadcast, enforces at-most-one broadcast per key,
//! creates and destroys broadcasts, and runs idle reclamation. Clone-able
//! with a shared inner (every clone sees the same registry).
//!
//! ## Concurrency
//!
//! The registry lock is only ever held for lookup/insert/remove — never
//! across resolution or any network call — so tune requests for distinct
//! station keys proceed in parallel. Two near-simultaneous tunes for the
//! same unconnected key race on the map insertion: the winner inserts a
//! `Resolving` broadcast and resolves the upstream; the loser awaits the
//! state transition and attaches to the winner's broadcast instead of
//! opening a second upstream connection.

use crate::broadcast::{Broadcast, BroadcastSnapshot, BroadcastState};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EngineEventEnvelope, EngineEventKind};
use crate::fetch::{HttpStreamFetcher, StreamFetcher};
use crate::session::{Session, SessionHandle, SessionId};
use crate::voice::{AudioSource, ChannelTarget, PlaybackEvent, VoiceGateway};
use futures::StreamExt;
use pmostations::StationResolver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

pub(crate) struct ManagerInner {
    pub(crate) config: EngineConfig,
    pub(crate) resolver: StationResolver,
    pub(crate) gateway: Arc<dyn VoiceGateway>,
    pub(crate) fetcher: Arc<dyn StreamFetcher>,
    /// station key → broadcast; the single source of truth
    pub(crate) broadcasts: RwLock<HashMap<String, Arc<Broadcast>>>,
    /// guild → its current session, for re-tune detection
    pub(crate) guild_sessions: RwLock<HashMap<String, SessionHandle>>,
    pub(crate) service_enabled: AtomicBool,
    pub(crate) event_tx: broadcast::Sender<EngineEventEnvelope>,
    pub(crate) session_counter: AtomicU64,
}

/// The broadcast registry and the engine's only public API surface
#[derive(Clone)]
pub struct BroadcastManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl BroadcastManager {
    /// Create a builder over the two required collaborators
    pub fn builder(resolver: StationResolver, gateway: Arc<dyn VoiceGateway>) -> BroadcastManagerBuilder {
        BroadcastManagerBuilder {
            config: EngineConfig::default(),
            resolver,
            gateway,
            fetcher: None,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether the service currently accepts tune requests
    pub fn service_enabled(&self) -> bool {
        self.inner.service_enabled.load(Ordering::SeqCst)
    }

    /// Subscribe to the engine event stream
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEventEnvelope> {
        self.inner.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, station_key: &str, session_id: Option<SessionId>, kind: EngineEventKind) {
        let envelope = EngineEventEnvelope::now(EngineEvent {
            station_key: station_key.to_string(),
            session_id,
            kind,
        });
        // Nobody listening is fine
        let _ = self.inner.event_tx.send(envelope);
    }

    // ------------------------------------------------------------------
    // tune
    // ------------------------------------------------------------------

    /// Attach a new session for `channel` to the broadcast of `station_key`,
    /// creating the broadcast if the station is not currently on air
    pub async fn tune(&self, station_key: &str, channel: ChannelTarget) -> Result<SessionHandle> {
        if !self.service_enabled() {
            return Err(Error::ServiceDisabled);
        }

        // Re-tune: the guild's previous session must be fully detached
        // before the new one is attached, never on two broadcasts at once
        let prior = self
            .inner
            .guild_sessions
            .read()
            .await
            .get(&channel.guild_id)
            .cloned();

        let broadcast = self.lookup_or_create(station_key).await?;

        if let Some(prior) = prior {
            tracing::debug!(guild = %channel.guild_id, old = %prior.station_key, new = station_key, "Re-tuning guild");
            // Same-station re-tune: skip the opportunistic sweep, under a
            // zero grace period it would reclaim the broadcast we are about
            // to attach to
            let sweep = prior.station_key != station_key;
            self.detach_inner(&prior, sweep).await;
        }

        let connection = self.inner.gateway.join(&channel).await?;

        let id = SessionId(self.inner.session_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let session = Arc::new(Session::new(
            id,
            channel.clone(),
            connection.clone(),
            self.inner.config.default_volume,
        ));

        if !broadcast.attach(session.clone()).await {
            // Torn down between lookup and attach
            let _ = connection.leave().await;
            return Err(Error::UpstreamUnreachable {
                key: station_key.to_string(),
                reason: "broadcast was torn down during attach".to_string(),
            });
        }

        let handle = SessionHandle {
            station_key: station_key.to_string(),
            session_id: id,
        };

        let _ = connection.set_volume(self.inner.config.default_volume).await;

        let playback = connection
            .play(
                AudioSource::Feed(broadcast.subscribe_feed()),
                self.inner.config.bitrate,
            )
            .await;
        let playback = match playback {
            Ok(rx) => rx,
            Err(e) => {
                broadcast.detach(id).await;
                let _ = connection.leave().await;
                return Err(e);
            }
        };

        let station_name = broadcast
            .details()
            .await
            .map(|d| d.record.name)
            .unwrap_or_default();

        self.spawn_session_monitor(handle.clone(), session.clone(), station_name.clone(), playback);

        self.inner
            .guild_sessions
            .write()
            .await
            .insert(channel.guild_id.clone(), handle.clone());

        tracing::info!(
            station = station_key,
            session = %id,
            channel = %channel,
            "Session attached"
        );
        self.emit(station_key, Some(id), EngineEventKind::Tuned { station_name });

        Ok(handle)
    }

    /// Look up the broadcast for a key, or create and resolve it
    async fn lookup_or_create(&self, station_key: &str) -> Result<Arc<Broadcast>> {
        // One retry: the entry we find may belong to a broadcast that is
        // being destroyed; the second pass creates a fresh one
        for _ in 0..2 {
            let (broadcast, creator) = {
                let mut map = self.inner.broadcasts.write().await;
                match map.get(station_key) {
                    Some(b) => (b.clone(), false),
                    None => {
                        // Checked under the map lock: the disable teardown
                        // drains the map under this same lock after flipping
                        // the flag, so nothing registers behind its back
                        if !self.service_enabled() {
                            return Err(Error::ServiceDisabled);
                        }
                        let b = Broadcast::new(station_key, self.inner.config.feed_buffer_chunks);
                        map.insert(station_key.to_string(), b.clone());
                        (b, true)
                    }
                }
            };

            if creator {
                return self.resolve_and_start(station_key, broadcast).await;
            }

            let mut state_rx = broadcast.subscribe_state();
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    BroadcastState::Active => return Ok(broadcast),
                    BroadcastState::Resolving => {
                        if state_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    BroadcastState::Failing | BroadcastState::Destroyed => break,
                }
            }
            // The broadcast we raced against went away; clear its stale
            // entry so the next pass creates a fresh one instead of finding
            // the same dead Arc again
            self.remove_entry(station_key, &broadcast).await;
        }

        Err(Error::UpstreamUnreachable {
            key: station_key.to_string(),
            reason: "station failed to start".to_string(),
        })
    }

    /// Creator path: resolve the station, connect the upstream, activate
    ///
    /// Runs without any registry lock held; a resolution or connection
    /// failure removes the entry before the error is returned, so no
    /// partial broadcast stays registered.
    async fn resolve_and_start(
        &self,
        station_key: &str,
        broadcast: Arc<Broadcast>,
    ) -> Result<Arc<Broadcast>> {
        let result = async {
            let details = self
                .inner
                .resolver
                .resolve(station_key)
                .await
                .map_err(|e| Error::from_station(station_key, e))?;

            let stream = self
                .inner
                .fetcher
                .open(&details.stream_url)
                .await
                .map_err(|e| Error::UpstreamUnreachable {
                    key: station_key.to_string(),
                    reason: e.to_string(),
                })?;

            Ok((details, stream))
        }
        .await;

        match result {
            Ok((details, stream)) => {
                if !broadcast.activate(details).await {
                    // Service was disabled while we resolved; the teardown
                    // already removed the registry entry
                    tracing::info!(station = station_key, "Broadcast torn down during resolution");
                    return Err(Error::ServiceDisabled);
                }
                self.spawn_upstream(broadcast.clone(), stream);
                tracing::info!(station = station_key, "Broadcast started");
                Ok(broadcast)
            }
            Err(e) => {
                self.inner.broadcasts.write().await.remove(station_key);
                broadcast.destroy().await;
                tracing::warn!(station = station_key, error = %e, "Broadcast creation failed");
                Err(e)
            }
        }
    }

    /// Fan the upstream chunk stream out on the broadcast's feed channel
    fn spawn_upstream(&self, broadcast: Arc<Broadcast>, mut stream: crate::fetch::ChunkStream) {
        let manager = self.clone();
        let feed = broadcast.feed_sender();
        let stop = broadcast.stop_token();
        let key = broadcast.station_key().to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        tracing::debug!(station = %key, "Upstream task stopped");
                        return;
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(chunk)) => {
                                // No receivers yet (or lagging ones) is not an error
                                let _ = feed.send(chunk);
                            }
                            Some(Err(e)) => {
                                manager.on_upstream_failure(&key, e.to_string()).await;
                                return;
                            }
                            None => {
                                // A live radio stream never ends cleanly
                                manager
                                    .on_upstream_failure(&key, "upstream stream ended".to_string())
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Forward playback events into the engine stream and auto-detach the
    /// session when its playback dies
    fn spawn_session_monitor(
        &self,
        handle: SessionHandle,
        session: Arc<Session>,
        station_name: String,
        mut playback: crate::voice::PlaybackEvents,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut announced = false;
            while let Some(event) = playback.recv().await {
                match event {
                    PlaybackEvent::Speaking(speaking) => {
                        session.set_speaking(speaking);
                        if speaking && !announced {
                            announced = true;
                            manager.emit(
                                &handle.station_key,
                                Some(handle.session_id),
                                EngineEventKind::NowPlaying {
                                    station_name: station_name.clone(),
                                },
                            );
                        }
                        manager.emit(
                            &handle.station_key,
                            Some(handle.session_id),
                            EngineEventKind::Speaking(speaking),
                        );
                    }
                    PlaybackEvent::Error(reason) => {
                        tracing::warn!(
                            station = %handle.station_key,
                            session = %handle.session_id,
                            %reason,
                            "Playback error, detaching session"
                        );
                        manager.emit(
                            &handle.station_key,
                            Some(handle.session_id),
                            EngineEventKind::PlaybackError(reason),
                        );
                        manager.detach(&handle).await;
                        return;
                    }
                    PlaybackEvent::Ended => {
                        manager.detach(&handle).await;
                        return;
                    }
                }
            }
            // Event channel closed without Ended: the playback was replaced
            // (failure recovery) or the backend dropped it; nothing to do
        });
    }

    // ------------------------------------------------------------------
    // detach / volume / diagnostics
    // ------------------------------------------------------------------

    /// Detach a session: leave its voice channel and remove it from its
    /// broadcast. Idempotent; detaching an unknown handle is a no-op.
    pub async fn detach(&self, handle: &SessionHandle) {
        self.detach_inner(handle, true).await;
    }

    async fn detach_inner(&self, handle: &SessionHandle, sweep: bool) {
        let broadcast = self
            .inner
            .broadcasts
            .read()
            .await
            .get(&handle.station_key)
            .cloned();
        let Some(broadcast) = broadcast else { return };

        let Some((session, empty)) = broadcast.detach(handle.session_id).await else {
            return;
        };

        session.set_speaking(false);
        let _ = session.connection.leave().await;

        {
            let mut guilds = self.inner.guild_sessions.write().await;
            if guilds.get(&session.channel().guild_id) == Some(handle) {
                guilds.remove(&session.channel().guild_id);
            }
        }

        tracing::info!(
            station = %handle.station_key,
            session = %handle.session_id,
            "Session detached"
        );
        self.emit(
            &handle.station_key,
            Some(handle.session_id),
            EngineEventKind::SessionEnded,
        );

        if empty && sweep {
            // Opportunistic sweep; the grace period still applies
            self.reclaim_idle().await;
        }
    }

    /// Set one session's volume without touching its siblings
    pub async fn set_volume(&self, handle: &SessionHandle, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(Error::InvalidVolume(volume));
        }

        let broadcast = self
            .inner
            .broadcasts
            .read()
            .await
            .get(&handle.station_key)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound {
                key: handle.station_key.clone(),
                session_id: handle.session_id.0,
            })?;

        let session =
            broadcast
                .session(handle.session_id)
                .await
                .ok_or_else(|| Error::SessionNotFound {
                    key: handle.station_key.clone(),
                    session_id: handle.session_id.0,
                })?;

        session.connection.set_volume(volume).await?;
        session.set_volume(volume);
        Ok(())
    }

    /// Read-only snapshot of every broadcast and its sessions
    pub async fn list_sessions(&self) -> Vec<BroadcastSnapshot> {
        let broadcasts: Vec<Arc<Broadcast>> = {
            let map = self.inner.broadcasts.read().await;
            map.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(broadcasts.len());
        for broadcast in broadcasts {
            snapshots.push(broadcast.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.station_key.cmp(&b.station_key));
        snapshots
    }

    // ------------------------------------------------------------------
    // service switch / reclamation
    // ------------------------------------------------------------------

    /// Enable or disable the whole service
    ///
    /// Disabling silently tears down every broadcast: no fallback clip, no
    /// per-session disconnect events. New tune requests are rejected with
    /// `ServiceDisabled` until re-enabled.
    pub async fn set_service_enabled(&self, enabled: bool) {
        let was = self.inner.service_enabled.swap(enabled, Ordering::SeqCst);
        if !was || enabled {
            if was != enabled {
                tracing::info!(enabled, "Broadcast service switched");
            }
            return;
        }

        tracing::info!("Broadcast service disabled, tearing down all broadcasts");
        let drained: Vec<(String, Arc<Broadcast>)> = {
            let mut map = self.inner.broadcasts.write().await;
            map.drain().collect()
        };

        for (key, broadcast) in drained {
            let sessions = broadcast.destroy().await;
            for session in sessions {
                let _ = session.connection.leave().await;
                let mut guilds = self.inner.guild_sessions.write().await;
                guilds.remove(&session.channel().guild_id);
            }
            self.emit(&key, None, EngineEventKind::BroadcastDestroyed);
        }
    }

    /// Destroy every broadcast that has been empty past the grace period
    ///
    /// Safe to call redundantly and concurrently: emptiness is re-validated
    /// under the broadcast's own lock immediately before destruction, and
    /// the destroy transition fires at most once per broadcast.
    pub async fn reclaim_idle(&self) {
        let grace = self.inner.config.reclaim_grace();
        let candidates: Vec<(String, Arc<Broadcast>)> = {
            let map = self.inner.broadcasts.read().await;
            map.iter().map(|(k, b)| (k.clone(), b.clone())).collect()
        };

        for (key, broadcast) in candidates {
            if broadcast.destroy_if_idle(grace).await {
                self.remove_entry(&key, &broadcast).await;
                tracing::info!(station = %key, "Idle broadcast reclaimed");
                self.emit(&key, None, EngineEventKind::BroadcastDestroyed);
            }
        }
    }

    /// Remove a specific broadcast's registry entry (pointer-compared, so a
    /// newer broadcast under the same key is left alone)
    pub(crate) async fn remove_entry(&self, key: &str, broadcast: &Arc<Broadcast>) {
        let mut map = self.inner.broadcasts.write().await;
        if let Some(current) = map.get(key) {
            if Arc::ptr_eq(current, broadcast) {
                map.remove(key);
            }
        }
    }

    /// Entry point of the upstream tasks on stream error or end
    pub(crate) async fn on_upstream_failure(&self, station_key: &str, reason: String) {
        let broadcast = self
            .inner
            .broadcasts
            .read()
            .await
            .get(station_key)
            .cloned();
        let Some(broadcast) = broadcast else { return };

        // At most one recovery sequence per broadcast
        if !broadcast.begin_failing().await {
            return;
        }

        tracing::warn!(station = station_key, %reason, "Upstream failed, starting recovery");
        self.emit(station_key, None, EngineEventKind::UpstreamFailed(reason));
        self.run_failure_recovery(broadcast).await;
    }

    /// Spawn the periodic idle-reclamation sweep
    fn spawn_reclaim_task(&self) {
        let interval = self.inner.config.reclaim_interval();
        if interval.is_zero() {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.reclaim_idle().await;
            }
        });
    }
}

/// Builder for [`BroadcastManager`]
pub struct BroadcastManagerBuilder {
    config: EngineConfig,
    resolver: StationResolver,
    gateway: Arc<dyn VoiceGateway>,
    fetcher: Option<Arc<dyn StreamFetcher>>,
}

impl BroadcastManagerBuilder {
    /// Set the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a custom upstream fetcher (defaults to HTTP streaming)
    pub fn fetcher(mut self, fetcher: Arc<dyn StreamFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build the manager and start its background sweep
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> BroadcastManager {
        let (event_tx, _) = broadcast::channel(self.config.event_buffer.max(1));
        let manager = BroadcastManager {
            inner: Arc::new(ManagerInner {
                fetcher: self
                    .fetcher
                    .unwrap_or_else(|| Arc::new(HttpStreamFetcher::new())),
                config: self.config,
                resolver: self.resolver,
                gateway: self.gateway,
                broadcasts: RwLock::new(HashMap::new()),
                guild_sessions: RwLock::new(HashMap::new()),
                service_enabled: AtomicBool::new(true),
                event_tx,
                session_counter: AtomicU64::new(0),
            }),
        };
        manager.spawn_reclaim_task();
        manager
    }
}
