//! Broadcasts
//!
//! A broadcast is one active upstream stream tied to a station key. It owns
//! its session set and the fan-out feed; the upstream handle (fetch task +
//! stop token) is exclusively its own, never a session's.
//!
//! State machine: `Resolving → Active → {Failing → Destroyed}` or
//! `Active → Destroyed` (idle reclamation / administrative disable).
//! `Resolving` only exists between registry insertion and the first
//! successful resolution; a resolution failure destroys the entry before
//! `tune` returns.
//!
//! All session mutation and every state transition happen under the same
//! write lock, so an attach can never race a destroy: whichever takes the
//! lock second sees the other's state.

use crate::session::{Session, SessionId, SessionSnapshot};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use pmostations::ResolvedStation;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BroadcastState {
    /// Registered under its key, upstream not yet resolved
    Resolving,
    /// Upstream connected, sessions may attach
    Active,
    /// Upstream broke, failure recovery is running
    Failing,
    /// Gone; the registry entry is removed alongside this transition
    Destroyed,
}

struct BroadcastInner {
    state: BroadcastState,
    details: Option<ResolvedStation>,
    sessions: Vec<Arc<Session>>,
    empty_since: Option<Instant>,
}

/// One active upstream stream shared by all its subscribers
pub struct Broadcast {
    station_key: String,
    created_at: DateTime<Utc>,
    inner: RwLock<BroadcastInner>,
    // Transitions go through send_replace so the watch value updates even
    // while nobody subscribes
    state_tx: watch::Sender<BroadcastState>,
    feed_tx: broadcast::Sender<Bytes>,
    stop: CancellationToken,
}

impl Broadcast {
    /// Create a broadcast in the `Resolving` state
    pub(crate) fn new(station_key: impl Into<String>, feed_buffer: usize) -> Arc<Self> {
        let (state_tx, _) = watch::channel(BroadcastState::Resolving);
        let (feed_tx, _) = broadcast::channel(feed_buffer.max(1));
        Arc::new(Self {
            station_key: station_key.into(),
            created_at: Utc::now(),
            inner: RwLock::new(BroadcastInner {
                state: BroadcastState::Resolving,
                details: None,
                sessions: Vec::new(),
                empty_since: Some(Instant::now()),
            }),
            state_tx,
            feed_tx,
            stop: CancellationToken::new(),
        })
    }

    /// Station key this broadcast is registered under
    pub fn station_key(&self) -> &str {
        &self.station_key
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state
    pub async fn state(&self) -> BroadcastState {
        self.inner.read().await.state
    }

    /// Watch state transitions (used by tune-race losers)
    pub fn subscribe_state(&self) -> watch::Receiver<BroadcastState> {
        self.state_tx.subscribe()
    }

    /// Sender half of the shared audio feed (upstream task side)
    pub(crate) fn feed_sender(&self) -> broadcast::Sender<Bytes> {
        self.feed_tx.clone()
    }

    /// New receiver on the shared audio feed (one per session playback)
    pub fn subscribe_feed(&self) -> broadcast::Receiver<Bytes> {
        self.feed_tx.subscribe()
    }

    /// Stop token owned by the upstream task
    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Resolved station details, once `Active`
    pub async fn details(&self) -> Option<ResolvedStation> {
        self.inner.read().await.details.clone()
    }

    /// Number of attached sessions
    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Clone the attach-ordered session list
    pub(crate) async fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.read().await.sessions.clone()
    }

    /// Find a session by id
    pub(crate) async fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// `Resolving → Active` with the resolved station details
    ///
    /// Returns false when the broadcast was destroyed while its creator was
    /// still resolving (administrative disable); a destroyed broadcast is
    /// never revived.
    pub(crate) async fn activate(&self, details: ResolvedStation) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != BroadcastState::Resolving {
            return false;
        }
        inner.details = Some(details);
        inner.state = BroadcastState::Active;
        self.state_tx.send_replace(BroadcastState::Active);
        true
    }

    /// `Active → Failing`; returns false if recovery already ran or the
    /// broadcast is gone, so the sequence executes at most once
    pub(crate) async fn begin_failing(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != BroadcastState::Active {
            return false;
        }
        inner.state = BroadcastState::Failing;
        self.state_tx.send_replace(BroadcastState::Failing);
        true
    }

    /// Terminal transition: cancel the upstream and drain all sessions
    ///
    /// The caller is responsible for any per-session disconnect handling;
    /// nothing is emitted here (administrative disable and the tail of
    /// failure recovery both come through this path).
    pub(crate) async fn destroy(&self) -> Vec<Arc<Session>> {
        self.stop.cancel();
        let mut inner = self.inner.write().await;
        inner.state = BroadcastState::Destroyed;
        self.state_tx.send_replace(BroadcastState::Destroyed);
        std::mem::take(&mut inner.sessions)
    }

    /// Reclaim this broadcast if it is still empty and past the grace period
    ///
    /// Re-validates emptiness under the write lock immediately before the
    /// destroy transition; a session attached since the empty signal was
    /// raised makes this a no-op.
    pub(crate) async fn destroy_if_idle(&self, grace: Duration) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != BroadcastState::Active {
            return false;
        }
        if !inner.sessions.is_empty() {
            return false;
        }
        match inner.empty_since {
            Some(since) if since.elapsed() >= grace => {
                self.stop.cancel();
                inner.state = BroadcastState::Destroyed;
                self.state_tx.send_replace(BroadcastState::Destroyed);
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Session set
    // ------------------------------------------------------------------

    /// Attach a session; fails when the broadcast is no longer `Active`
    pub(crate) async fn attach(&self, session: Arc<Session>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != BroadcastState::Active {
            return false;
        }
        inner.empty_since = None;
        inner.sessions.push(session);
        true
    }

    /// Remove a session by id; returns it plus whether the set is now empty
    ///
    /// Idempotent: a second detach of the same id returns `None`.
    pub(crate) async fn detach(&self, id: SessionId) -> Option<(Arc<Session>, bool)> {
        let mut inner = self.inner.write().await;
        let pos = inner.sessions.iter().position(|s| s.id() == id)?;
        let session = inner.sessions.remove(pos);
        let empty = inner.sessions.is_empty();
        if empty {
            inner.empty_since = Some(Instant::now());
        }
        Some((session, empty))
    }

    /// Read-only copy for diagnostics
    pub async fn snapshot(&self) -> BroadcastSnapshot {
        let inner = self.inner.read().await;
        BroadcastSnapshot {
            station_key: self.station_key.clone(),
            station_name: inner.details.as_ref().map(|d| d.record.name.clone()),
            stream_url: inner.details.as_ref().map(|d| d.stream_url.clone()),
            state: inner.state,
            created_at: self.created_at,
            subscriber_count: inner.sessions.len(),
            sessions: inner.sessions.iter().map(|s| s.snapshot()).collect(),
        }
    }
}

/// Diagnostic copy of one broadcast and its sessions
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastSnapshot {
    pub station_key: String,
    pub station_name: Option<String>,
    pub stream_url: Option<String>,
    pub state: BroadcastState,
    pub created_at: DateTime<Utc>,
    pub subscriber_count: usize,
    pub sessions: Vec<SessionSnapshot>,
}
