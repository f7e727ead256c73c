//! Integration tests for the broadcast engine
//!
//! All external collaborators are replaced by in-memory mocks: a static
//! catalog, a scriptable upstream fetcher and a recording voice gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use pmobroadcast::{
    AudioSource, BroadcastManager, ChannelTarget, ChunkStream, EngineConfig, EngineEventEnvelope,
    EngineEventKind, Error, FetchError, PlaybackEvent, PlaybackEvents, StreamFetcher,
    VoiceConnection, VoiceGateway,
};
use pmostations::{StationRecord, StationResolver, StaticCatalog};

// ===========================================================================
// Mocks
// ===========================================================================

/// Scriptable upstream: every `open` hands back a channel-backed stream the
/// test can push chunks, errors or an end-of-stream into
#[derive(Default)]
struct MockFetcher {
    open_count: AtomicUsize,
    feeds: Mutex<Vec<futures::channel::mpsc::UnboundedSender<Result<Bytes, FetchError>>>>,
    fail_open: AtomicBool,
    /// Artificial connect latency, to widen the resolution window
    delay_ms: AtomicU64,
}

impl MockFetcher {
    fn opened(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    fn break_stream(&self, index: usize) {
        let feeds = self.feeds.lock().unwrap();
        feeds[index]
            .unbounded_send(Err(FetchError("connection reset by peer".into())))
            .ok();
    }
}

#[async_trait::async_trait]
impl StreamFetcher for MockFetcher {
    async fn open(&self, _url: &str) -> Result<ChunkStream, FetchError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(FetchError("refused".into()));
        }
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = futures::channel::mpsc::unbounded();
        self.feeds.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}

/// What one mock connection was asked to play
#[derive(Debug, Clone, PartialEq)]
enum Played {
    Feed,
    Clip(String),
}

struct MockConnection {
    channel: ChannelTarget,
    volume: Mutex<f32>,
    left: AtomicBool,
    plays: Mutex<Vec<Played>>,
    /// Sender for the live-feed playback's events, so tests can script them
    feed_events: Mutex<Option<tokio::sync::mpsc::Sender<PlaybackEvent>>>,
}

impl MockConnection {
    fn new(channel: ChannelTarget) -> Self {
        Self {
            channel,
            volume: Mutex::new(1.0),
            left: AtomicBool::new(false),
            plays: Mutex::new(Vec::new()),
            feed_events: Mutex::new(None),
        }
    }

    fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }

    fn played(&self) -> Vec<Played> {
        self.plays.lock().unwrap().clone()
    }

    fn played_clip(&self) -> bool {
        self.played().iter().any(|p| matches!(p, Played::Clip(_)))
    }

    async fn send_feed_event(&self, event: PlaybackEvent) {
        let tx = self.feed_events.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(event).await.ok();
        }
    }
}

#[async_trait::async_trait]
impl VoiceConnection for MockConnection {
    async fn play(&self, source: AudioSource, _bitrate: u32) -> pmobroadcast::Result<PlaybackEvents> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        match source {
            AudioSource::Feed(_) => {
                self.plays.lock().unwrap().push(Played::Feed);
                // Replacing an earlier feed playback drops its sender
                *self.feed_events.lock().unwrap() = Some(tx);
            }
            AudioSource::Clip(url) => {
                self.plays.lock().unwrap().push(Played::Clip(url));
                // Drop any previous feed sender: the clip replaced it
                *self.feed_events.lock().unwrap() = None;
                // A clip is short and finite
                tokio::spawn(async move {
                    tx.send(PlaybackEvent::Speaking(true)).await.ok();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    tx.send(PlaybackEvent::Ended).await.ok();
                });
            }
        }
        Ok(rx)
    }

    async fn set_volume(&self, volume: f32) -> pmobroadcast::Result<()> {
        *self.volume.lock().unwrap() = volume;
        Ok(())
    }

    async fn leave(&self) -> pmobroadcast::Result<()> {
        self.left.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MockGateway {
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockGateway {
    fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    fn connection_for_guild(&self, guild_id: &str) -> Option<Arc<MockConnection>> {
        self.connections()
            .into_iter()
            .find(|c| c.channel.guild_id == guild_id)
    }
}

#[async_trait::async_trait]
impl VoiceGateway for MockGateway {
    async fn join(&self, target: &ChannelTarget) -> pmobroadcast::Result<Arc<dyn VoiceConnection>> {
        let connection = Arc::new(MockConnection::new(target.clone()));
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

// ===========================================================================
// Harness
// ===========================================================================

struct Harness {
    manager: BroadcastManager,
    gateway: Arc<MockGateway>,
    fetcher: Arc<MockFetcher>,
    events: tokio::sync::broadcast::Receiver<EngineEventEnvelope>,
}

fn test_config() -> EngineConfig {
    EngineConfig {
        reclaim_grace_secs: 0,
        reclaim_interval_secs: 0, // no background sweep; tests drive it
        recovery_timeout_secs: 2,
        ..EngineConfig::default()
    }
}

fn harness_with(config: EngineConfig) -> Harness {
    let catalog = StaticCatalog::from_records([
        StationRecord::new("87.6", "Test FM", "http://stream.test/live.mp3"),
        StationRecord::new("101.1", "Jazz One", "http://stream.test/jazz.mp3"),
    ]);
    let resolver = StationResolver::new(Arc::new(catalog));
    let gateway = Arc::new(MockGateway::default());
    let fetcher = Arc::new(MockFetcher::default());

    let manager = BroadcastManager::builder(resolver, gateway.clone())
        .config(config)
        .fetcher(fetcher.clone())
        .build();
    let events = manager.subscribe();

    Harness {
        manager,
        gateway,
        fetcher,
        events,
    }
}

fn harness() -> Harness {
    harness_with(test_config())
}

fn target(guild: &str) -> ChannelTarget {
    ChannelTarget::new(guild, format!("voice-{}", guild))
}

impl Harness {
    /// Drain every event published so far
    fn drain_events(&mut self) -> Vec<EngineEventKind> {
        let mut kinds = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            kinds.push(envelope.event.kind);
        }
        kinds
    }

    /// Wait until the registry holds exactly `count` broadcasts
    async fn wait_for_broadcast_count(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.manager.list_sessions().await.len() == count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} broadcasts",
                count
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn concurrent_tunes_share_one_upstream() {
    let h = harness();

    let tunes = (0..5).map(|i| {
        let manager = h.manager.clone();
        let guild = format!("guild-{}", i);
        async move { manager.tune("87.6", target(&guild)).await }
    });
    let results = futures::future::join_all(tunes).await;

    for result in &results {
        assert!(result.is_ok(), "tune failed: {:?}", result);
    }

    // Exactly one upstream connection, five sessions on it
    assert_eq!(h.fetcher.opened(), 1);
    let snapshots = h.manager.list_sessions().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].station_key, "87.6");
    assert_eq!(snapshots[0].subscriber_count, 5);
}

#[tokio::test]
async fn unknown_station_registers_nothing() {
    let h = harness();

    let err = h.manager.tune("0.0", target("guild-1")).await.unwrap_err();
    assert!(matches!(err, Error::UnknownStation(_)));
    assert!(h.manager.list_sessions().await.is_empty());
    assert_eq!(h.fetcher.opened(), 0);
}

#[tokio::test]
async fn unreachable_upstream_registers_nothing() {
    let h = harness();
    h.fetcher.fail_open.store(true, Ordering::SeqCst);

    let err = h.manager.tune("87.6", target("guild-1")).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnreachable { .. }));
    assert!(h.manager.list_sessions().await.is_empty());

    // The key is free again: a later tune may retry
    h.fetcher.fail_open.store(false, Ordering::SeqCst);
    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    assert_eq!(h.manager.list_sessions().await.len(), 1);
}

#[tokio::test]
async fn detach_empties_and_reclaims_exactly_once() {
    let mut h = harness();

    let session = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.manager.detach(&session).await;

    // Grace is zero: the opportunistic sweep already reclaimed it
    assert!(h.manager.list_sessions().await.is_empty());

    // Redundant sweeps, also concurrently, destroy nothing further
    tokio::join!(h.manager.reclaim_idle(), h.manager.reclaim_idle());
    h.manager.reclaim_idle().await;

    let destroyed = h
        .drain_events()
        .into_iter()
        .filter(|k| matches!(k, EngineEventKind::BroadcastDestroyed))
        .count();
    assert_eq!(destroyed, 1);

    // Detaching the dead handle again is a no-op
    h.manager.detach(&session).await;
}

#[tokio::test]
async fn grace_period_keeps_empty_broadcast_alive() {
    let config = EngineConfig {
        reclaim_grace_secs: 3600,
        reclaim_interval_secs: 0,
        ..EngineConfig::default()
    };
    let h = harness_with(config);

    let session = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.manager.detach(&session).await;
    h.manager.reclaim_idle().await;

    // Still registered, just empty
    let snapshots = h.manager.list_sessions().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].subscriber_count, 0);

    // A fresh tune reuses the surviving broadcast: still one upstream
    h.manager.tune("87.6", target("guild-2")).await.unwrap();
    assert_eq!(h.fetcher.opened(), 1);
    assert_eq!(h.manager.list_sessions().await[0].subscriber_count, 1);
}

#[tokio::test]
async fn volume_is_per_session() {
    let h = harness();

    let a = h.manager.tune("87.6", target("guild-a")).await.unwrap();
    let _b = h.manager.tune("87.6", target("guild-b")).await.unwrap();

    h.manager.set_volume(&a, 0.9).await.unwrap();

    let conn_a = h.gateway.connection_for_guild("guild-a").unwrap();
    let conn_b = h.gateway.connection_for_guild("guild-b").unwrap();
    assert!((conn_a.volume() - 0.9).abs() < f32::EPSILON);
    // B still carries the configured default
    assert!((conn_b.volume() - 0.5).abs() < f32::EPSILON);

    let snapshots = h.manager.list_sessions().await;
    let volumes: HashMap<String, f32> = snapshots[0]
        .sessions
        .iter()
        .map(|s| (s.guild_id.clone(), s.volume))
        .collect();
    assert!((volumes["guild-a"] - 0.9).abs() < f32::EPSILON);
    assert!((volumes["guild-b"] - 0.5).abs() < f32::EPSILON);
}

#[tokio::test]
async fn volume_outside_range_is_rejected() {
    let h = harness();
    let session = h.manager.tune("87.6", target("guild-1")).await.unwrap();

    let err = h.manager.set_volume(&session, 1.5).await.unwrap_err();
    assert!(matches!(err, Error::InvalidVolume(_)));
    let err = h.manager.set_volume(&session, -0.1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidVolume(_)));

    // No state change
    let conn = h.gateway.connection_for_guild("guild-1").unwrap();
    assert!((conn.volume() - 0.5).abs() < f32::EPSILON);
}

#[tokio::test]
async fn volume_on_dead_session_is_an_error() {
    let h = harness();
    let session = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.manager.detach(&session).await;

    let err = h.manager.set_volume(&session, 0.7).await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound { .. }));
}

#[tokio::test]
async fn upstream_failure_runs_full_recovery() {
    let mut h = harness();

    for guild in ["guild-1", "guild-2", "guild-3"] {
        h.manager.tune("87.6", target(guild)).await.unwrap();
    }
    h.drain_events();

    // Break the upstream
    h.fetcher.break_stream(0);
    h.wait_for_broadcast_count(0).await;

    // Every session heard the clip, then was force-disconnected
    for guild in ["guild-1", "guild-2", "guild-3"] {
        let conn = h.gateway.connection_for_guild(guild).unwrap();
        assert!(conn.played_clip(), "{} did not receive the fallback clip", guild);
        assert!(conn.has_left(), "{} was not disconnected", guild);
    }

    let kinds = h.drain_events();
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::UpstreamFailed(_))));
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::FallbackClip)));
    let ended = kinds
        .iter()
        .filter(|k| matches!(k, EngineEventKind::SessionEnded))
        .count();
    assert_eq!(ended, 3);
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::BroadcastDestroyed)));

    // The station key is free for a fresh tune
    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    assert_eq!(h.fetcher.opened(), 2);
}

#[tokio::test]
async fn upstream_end_is_treated_as_failure() {
    let mut h = harness();

    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.drain_events();

    // Drop the feed sender: the chunk stream ends
    h.fetcher.feeds.lock().unwrap().clear();
    h.wait_for_broadcast_count(0).await;

    let kinds = h.drain_events();
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::UpstreamFailed(_))));
}

#[tokio::test]
async fn disable_tears_down_silently() {
    let mut h = harness();

    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.manager.tune("101.1", target("guild-2")).await.unwrap();
    assert_eq!(h.manager.list_sessions().await.len(), 2);
    h.drain_events();

    h.manager.set_service_enabled(false).await;

    assert!(h.manager.list_sessions().await.is_empty());
    for guild in ["guild-1", "guild-2"] {
        let conn = h.gateway.connection_for_guild(guild).unwrap();
        assert!(conn.has_left());
        assert!(!conn.played_clip(), "silent teardown must not play the clip");
    }

    let kinds = h.drain_events();
    assert!(!kinds.iter().any(|k| matches!(k, EngineEventKind::FallbackClip)));
    assert!(!kinds.iter().any(|k| matches!(k, EngineEventKind::SessionEnded)));

    let err = h.manager.tune("87.6", target("guild-3")).await.unwrap_err();
    assert!(matches!(err, Error::ServiceDisabled));

    // Re-enabling restores service
    h.manager.set_service_enabled(true).await;
    h.manager.tune("87.6", target("guild-3")).await.unwrap();
}

#[tokio::test]
async fn disable_during_tune_is_rejected_cleanly() {
    let h = harness();
    h.fetcher.delay_ms.store(200, Ordering::SeqCst);

    let manager = h.manager.clone();
    let tune = tokio::spawn(async move { manager.tune("87.6", target("guild-1")).await });

    // Disable while the creator is still connecting the upstream
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.manager.set_service_enabled(false).await;

    let result = tune.await.unwrap();
    assert!(matches!(result, Err(Error::ServiceDisabled)));

    // Nothing joined, nothing registered, no session left behind
    assert!(h.gateway.connections().is_empty());
    assert!(h.manager.list_sessions().await.is_empty());

    // The key works again once the service is back
    h.manager.set_service_enabled(true).await;
    h.fetcher.delay_ms.store(0, Ordering::SeqCst);
    h.manager.tune("87.6", target("guild-1")).await.unwrap();
}

#[tokio::test]
async fn retune_same_station_keeps_broadcast_alive() {
    // Zero grace: the prior session emptying the broadcast must not
    // reclaim it out from under the new attach
    let h = harness();

    let first = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    let second = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    // Still the original upstream, exactly one session on it
    assert_eq!(h.fetcher.opened(), 1);
    let snapshots = h.manager.list_sessions().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].subscriber_count, 1);
}

#[tokio::test]
async fn retune_detaches_before_attaching() {
    // Long grace so the old broadcast survives and we can inspect counts
    let mut h = harness_with(EngineConfig {
        reclaim_grace_secs: 3600,
        reclaim_interval_secs: 0,
        ..EngineConfig::default()
    });

    let first = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.drain_events();

    let second = h.manager.tune("101.1", target("guild-1")).await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    let snapshots = h.manager.list_sessions().await;
    let by_key: HashMap<&str, usize> = snapshots
        .iter()
        .map(|s| (s.station_key.as_str(), s.subscriber_count))
        .collect();
    assert_eq!(by_key["87.6"], 0, "old session must be gone");
    assert_eq!(by_key["101.1"], 1);

    // Detach from the old broadcast happened before the new attach
    let kinds = h.drain_events();
    let ended_pos = kinds
        .iter()
        .position(|k| matches!(k, EngineEventKind::SessionEnded))
        .expect("old session must emit SessionEnded");
    let tuned_pos = kinds
        .iter()
        .position(|k| matches!(k, EngineEventKind::Tuned { .. }))
        .expect("new session must emit Tuned");
    assert!(ended_pos < tuned_pos, "detach must precede the new attach");
}

#[tokio::test]
async fn speaking_events_update_session_state() {
    let mut h = harness();

    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.drain_events();

    let conn = h.gateway.connection_for_guild("guild-1").unwrap();
    conn.send_feed_event(PlaybackEvent::Speaking(true)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshots = h.manager.list_sessions().await;
        if snapshots[0].sessions[0].speaking {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "speaking flag never set");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let kinds = h.drain_events();
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::NowPlaying { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::Speaking(true))));
}

#[tokio::test]
async fn playback_error_detaches_the_session() {
    let mut h = harness();

    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.drain_events();

    let conn = h.gateway.connection_for_guild("guild-1").unwrap();
    conn.send_feed_event(PlaybackEvent::Error("ice timeout".into()))
        .await;

    // Session auto-detaches; with zero grace the broadcast goes too
    h.wait_for_broadcast_count(0).await;
    assert!(conn.has_left());

    let kinds = h.drain_events();
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::PlaybackError(_))));
    assert!(kinds.iter().any(|k| matches!(k, EngineEventKind::SessionEnded)));
}

#[tokio::test]
async fn consumer_detach_preempts_recovery() {
    let mut h = harness();

    let keeper = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    let leaver = h.manager.tune("87.6", target("guild-2")).await.unwrap();
    let _ = keeper;
    h.drain_events();

    // Detach one session, then immediately break the upstream
    h.manager.detach(&leaver).await;
    h.fetcher.break_stream(0);
    h.wait_for_broadcast_count(0).await;

    // The already-detached session is skipped, not double-processed:
    // exactly one SessionEnded from the detach and one from recovery
    let kinds = h.drain_events();
    let ended = kinds
        .iter()
        .filter(|k| matches!(k, EngineEventKind::SessionEnded))
        .count();
    assert_eq!(ended, 2);

    // The departed guild never heard the fallback clip
    let conn = h.gateway.connection_for_guild("guild-2").unwrap();
    assert!(!conn.played_clip());
}

#[tokio::test]
async fn distinct_stations_get_distinct_broadcasts() {
    let h = harness();

    h.manager.tune("87.6", target("guild-1")).await.unwrap();
    h.manager.tune("101.1", target("guild-2")).await.unwrap();

    assert_eq!(h.fetcher.opened(), 2);
    let snapshots = h.manager.list_sessions().await;
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|s| s.subscriber_count == 1));
}

#[tokio::test]
async fn snapshots_are_copies_not_live_views() {
    let h = harness();

    let session = h.manager.tune("87.6", target("guild-1")).await.unwrap();
    let before = h.manager.list_sessions().await;

    h.manager.set_volume(&session, 0.9).await.unwrap();

    // The earlier snapshot is unaffected by the mutation
    assert!((before[0].sessions[0].volume - 0.5).abs() < f32::EPSILON);
}
