//! Playback session table.
//!
//! Maps (stream, representation, player session) to at most one live
//! [`TranscodingSession`] and decides when a run can be reused, when it has
//! to be replaced, and when an idle one is torn down.

use crate::config::Config;
use crate::transcode::{
    AvailableSegments, EncoderLauncher, ProgressReport, SessionParams, TranscodingSession,
};
use dashmap::DashMap;
use reelforge_common::{Error, PlayerSessionId, Result, StreamKey, TranscodeSessionId};
use reelforge_media::{RepresentationId, StreamRepresentation};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Forward window, in segments, inside which a request reuses the running
/// session. Players skip ahead when a delivered segment ran longer than the
/// nominal duration; seeks outside the window restart the encoder.
pub const DEFAULT_REUSE_WINDOW: u32 = 5;

/// Segments the encoder may run ahead of the player before it is paused.
pub const DEFAULT_THROTTLE_AHEAD: u32 = 8;

/// One player watching one representation of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaybackSessionKey {
    pub stream: StreamKey,
    pub representation: RepresentationId,
    pub player: PlayerSessionId,
}

impl fmt::Display for PlaybackSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.stream, self.representation, self.player)
    }
}

/// What a request wants from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRequest {
    /// The container header.
    Init,
    /// A numbered media or subtitle segment.
    Media(u32),
}

impl fmt::Display for SegmentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Media(index) => write!(f, "{index}"),
        }
    }
}

/// Session policy knobs.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Parent of every session output directory.
    pub output_root: PathBuf,
    /// Nominal segment length in seconds.
    pub segment_duration_secs: f64,
    /// Segments produced by one transmux run before a new run takes over.
    pub max_transmux_segments: u32,
    /// See [`DEFAULT_REUSE_WINDOW`].
    pub reuse_window: u32,
    /// See [`DEFAULT_THROTTLE_AHEAD`].
    pub throttle_ahead_segments: u32,
    /// Unreferenced sessions idle for longer than this are destroyed.
    pub idle_timeout: Duration,
    /// Time between terminate and kill when destroying a session.
    pub terminate_grace: Duration,
    /// How long an init request without a run waits for a media request to
    /// choose where the run starts.
    pub init_handoff: Duration,
    /// Base URL the encoder posts progress to.
    pub callback_base: Option<String>,
}

impl PlaybackConfig {
    pub fn from_config(config: &Config) -> Self {
        let transcode = &config.transcode;
        Self {
            output_root: transcode.temp_dir.clone(),
            segment_duration_secs: transcode.segment_duration_secs,
            max_transmux_segments: transcode.max_transmux_segments,
            reuse_window: transcode.reuse_window,
            throttle_ahead_segments: transcode.throttle_ahead_segments,
            idle_timeout: transcode.idle_timeout(),
            terminate_grace: transcode.terminate_grace(),
            init_handoff: transcode.init_handoff(),
            callback_base: Some(config.server.callback_base()),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Whether the encoder is far enough ahead of the player to be paused.
///
/// `produced` is the highest segment index on disk, `consumed` the last one
/// served. Before anything is served the run's first segment counts as the
/// consumption point.
pub fn should_throttle(produced: Option<u32>, consumed: Option<u32>, start: u32, threshold: u32) -> bool {
    let Some(produced) = produced else {
        return false;
    };
    let consumed = consumed.map_or(start, |c| c.max(start));
    produced.saturating_sub(consumed) > threshold
}

#[derive(Debug, Default)]
struct EntryState {
    /// Set once the entry left the table; holders must look it up again.
    retired: bool,
    session: Option<Arc<TranscodingSession>>,
    last_requested: u32,
    last_served: Option<u32>,
}

impl EntryState {
    fn live_session(&self) -> Option<Arc<TranscodingSession>> {
        self.session.as_ref().filter(|s| !s.is_destroyed()).cloned()
    }
}

#[derive(Debug)]
struct PlaybackEntry {
    state: tokio::sync::Mutex<EntryState>,
    /// Signalled whenever a new run is bound to the entry.
    bound: tokio::sync::Notify,
    refs: AtomicUsize,
    last_access: parking_lot::Mutex<Instant>,
}

impl PlaybackEntry {
    fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(EntryState::default()),
            bound: tokio::sync::Notify::new(),
            refs: AtomicUsize::new(0),
            last_access: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }
}

/// Outcome of [`PlaybackManager::destroy_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Sessions whose teardown completed.
    pub destroyed: usize,
    /// Sessions still tearing down when the deadline passed.
    pub leaked: usize,
}

/// Holds one reference on an entry; taken before the entry lock so idle
/// cleanup never retires an entry a request is waiting on.
#[derive(Debug)]
struct EntryRef(Arc<PlaybackEntry>);

impl EntryRef {
    fn new(entry: Arc<PlaybackEntry>) -> Self {
        entry.refs.fetch_add(1, Ordering::AcqRel);
        Self(entry)
    }
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        *self.0.last_access.lock() = Instant::now();
        self.0.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run parameters kept by an init lease until its run is known.
#[derive(Debug)]
struct PendingStart {
    key: PlaybackSessionKey,
    stream_rep: Arc<StreamRepresentation>,
    source: PathBuf,
}

/// A counted reference to a playback session, held for one request.
///
/// Dropping the lease releases the reference and refreshes the idle clock,
/// whatever way the request ended.
#[derive(Debug)]
pub struct PlaybackLease {
    entry: EntryRef,
    session: Option<Arc<TranscodingSession>>,
    pending: Option<PendingStart>,
    throttle_ahead: u32,
}

impl PlaybackLease {
    /// The transcoding session serving this request.
    ///
    /// `None` for an init request that arrived before any run existed, until
    /// [`PlaybackManager::bind`] settles it.
    pub fn session(&self) -> Option<&Arc<TranscodingSession>> {
        self.session.as_ref()
    }

    /// Whether the lease still waits for a run to be chosen.
    pub fn is_pending(&self) -> bool {
        self.session.is_none()
    }

    /// Record that `index` was delivered, resuming the encoder if the player
    /// has caught up with it.
    pub async fn mark_served(&self, index: u32, available: &AvailableSegments) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let consumed = {
            let mut state = self.entry.0.state.lock().await;
            if !state
                .session
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(s, session))
            {
                return;
            }
            let served = index.min(state.last_requested);
            state.last_served = Some(state.last_served.map_or(served, |s| s.max(served)));
            state.last_served
        };

        if session.is_throttled()
            && !should_throttle(
                available.highest_on_disk,
                consumed,
                session.start_segment(),
                self.throttle_ahead,
            )
        {
            session.resume();
        }
    }
}

/// Registry of playback sessions.
pub struct PlaybackManager {
    config: PlaybackConfig,
    launcher: Arc<dyn EncoderLauncher>,
    entries: DashMap<PlaybackSessionKey, Arc<PlaybackEntry>>,
    by_transcode: DashMap<TranscodeSessionId, Weak<PlaybackEntry>>,
}

impl fmt::Debug for PlaybackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackManager")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl PlaybackManager {
    pub fn new(config: PlaybackConfig, launcher: Arc<dyn EncoderLauncher>) -> Self {
        Self {
            config,
            launcher,
            entries: DashMap::new(),
            by_transcode: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Find or start the session that should serve `request`, and take a
    /// reference on it.
    ///
    /// Concurrent callers with the same key are serialized on the entry, so
    /// at most one session is ever created for it. An init request that finds
    /// no running session does not start one; the returned lease is pending
    /// until [`bind`](Self::bind) resolves it.
    ///
    /// # Errors
    ///
    /// Session creation failures ([`SpawnError`](reelforge_common::Error::SpawnError),
    /// [`DirectoryAccess`](reelforge_common::Error::DirectoryAccess)).
    pub async fn acquire(
        &self,
        key: &PlaybackSessionKey,
        request: SegmentRequest,
        stream_rep: &Arc<StreamRepresentation>,
        source: &Path,
    ) -> Result<PlaybackLease> {
        loop {
            let entry = Arc::clone(
                self.entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(PlaybackEntry::new()))
                    .value(),
            );
            let held = EntryRef::new(Arc::clone(&entry));

            let mut state = entry.state.lock().await;
            if state.retired {
                drop(state);
                drop(held);
                tokio::task::yield_now().await;
                continue;
            }

            let reused = self.reusable(key, &mut state, request).await;
            let session = match reused {
                Some(session) => Some(session),
                None => match request {
                    SegmentRequest::Init => None,
                    SegmentRequest::Media(index) => {
                        let (session, replaced) = self
                            .start_session(key, &entry, &mut state, stream_rep, source, index)
                            .await;
                        drop(state);
                        if let Some(old) = replaced {
                            old.destroy_detached();
                        }
                        Some(session?)
                    }
                },
            };

            let pending = session.is_none().then(|| PendingStart {
                key: key.clone(),
                stream_rep: Arc::clone(stream_rep),
                source: source.to_path_buf(),
            });
            return Ok(PlaybackLease {
                entry: held,
                session,
                pending,
                throttle_ahead: self.config.throttle_ahead_segments,
            });
        }
    }

    /// Resolve a pending init lease to a run.
    ///
    /// Waits up to the init handoff for the player's first media request to
    /// start the run where playback actually is. When none arrives, a run is
    /// started at the position the same player reached on another
    /// representation of the stream, or at the beginning. Bound leases are
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Session creation failures, or [`Error::SegmentNotFound`] when the
    /// playback session is shut down during the wait.
    pub async fn bind(&self, mut lease: PlaybackLease) -> Result<PlaybackLease> {
        let Some(pending) = lease.pending.take() else {
            return Ok(lease);
        };
        let entry = Arc::clone(&lease.entry.0);
        let deadline = tokio::time::Instant::now() + self.config.init_handoff;

        loop {
            let notified = entry.bound.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut state = entry.state.lock().await;
            if state.retired {
                return Err(Error::SegmentNotFound {
                    segment: SegmentRequest::Init.to_string(),
                });
            }
            if let Some(session) = state.live_session() {
                lease.session = Some(session);
                return Ok(lease);
            }

            if tokio::time::Instant::now() >= deadline {
                let start = self.start_hint(&pending.key, &pending.stream_rep);
                let (session, replaced) = self
                    .start_session(
                        &pending.key,
                        &entry,
                        &mut state,
                        &pending.stream_rep,
                        &pending.source,
                        start,
                    )
                    .await;
                drop(state);
                if let Some(old) = replaced {
                    old.destroy_detached();
                }
                lease.session = Some(session?);
                return Ok(lease);
            }
            drop(state);

            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    /// The running session if it can serve `request` as is.
    async fn reusable(
        &self,
        key: &PlaybackSessionKey,
        state: &mut EntryState,
        request: SegmentRequest,
    ) -> Option<Arc<TranscodingSession>> {
        let index = match request {
            SegmentRequest::Init => return state.live_session(),
            SegmentRequest::Media(index) => index,
        };
        let session = state.session.clone()?;

        if self.can_reuse(state, &session, index).await {
            tracing::debug!(
                key = %key,
                session_id = %session.id(),
                segment = index,
                last_requested = state.last_requested,
                "Reusing transcoding session"
            );
            state.last_requested = index;
            return Some(session);
        }
        tracing::debug!(
            key = %key,
            session_id = %session.id(),
            segment = index,
            last_requested = state.last_requested,
            "Request outside reuse window, restarting"
        );
        None
    }

    /// Start a run at `index` and bind it to the entry.
    ///
    /// The run it replaces is unbound and returned so the caller can tear it
    /// down once the entry lock is released.
    async fn start_session(
        &self,
        key: &PlaybackSessionKey,
        entry: &Arc<PlaybackEntry>,
        state: &mut EntryState,
        stream_rep: &Arc<StreamRepresentation>,
        source: &Path,
        index: u32,
    ) -> (Result<Arc<TranscodingSession>>, Option<Arc<TranscodingSession>>) {
        let replaced = state.session.take();
        if let Some(old) = &replaced {
            self.by_transcode.remove(&old.id());
        }

        let session = match self.create_session(stream_rep, source, index).await {
            Ok(session) => session,
            Err(e) => return (Err(e), replaced),
        };
        self.by_transcode
            .insert(session.id(), Arc::downgrade(entry));
        state.session = Some(Arc::clone(&session));
        state.last_requested = index;
        state.last_served = None;
        entry.bound.notify_waiters();

        tracing::info!(
            key = %key,
            session_id = %session.id(),
            start = session.start_segment(),
            end = session.end_segment(),
            "Playback session bound to new transcoding session"
        );

        (Ok(session), replaced)
    }

    /// Where the same player currently is on another representation of the
    /// stream, as a segment index of `stream_rep`.
    fn start_hint(&self, key: &PlaybackSessionKey, stream_rep: &StreamRepresentation) -> u32 {
        let position = self
            .entries
            .iter()
            .filter(|e| {
                let other = e.key();
                other.stream == key.stream
                    && other.player == key.player
                    && other.representation != key.representation
            })
            .filter_map(|e| {
                // Busy entries are skipped rather than waited on.
                let state = e.value().state.try_lock().ok()?;
                let session = state.live_session()?;
                session.stream_rep().segment_start(state.last_requested)
            })
            .max();

        position.map_or(0, |ticks| stream_rep.segment_at(ticks))
    }

    async fn can_reuse(&self, state: &EntryState, session: &TranscodingSession, index: u32) -> bool {
        if session.is_destroyed() || !session.covers(index) {
            return false;
        }
        let window_end = state.last_requested.saturating_add(self.config.reuse_window);
        if index < state.last_requested || index > window_end {
            return false;
        }
        if !session.is_exited() {
            return true;
        }
        // A finished run is only useful if it actually wrote the segment.
        session
            .available_segments()
            .await
            .map(|available| available.get(index).is_some())
            .unwrap_or(false)
    }

    async fn create_session(
        &self,
        stream_rep: &Arc<StreamRepresentation>,
        source: &Path,
        start: u32,
    ) -> Result<Arc<TranscodingSession>> {
        let count = stream_rep.segment_count();
        let end = if stream_rep.representation.transmuxed() {
            start
                .saturating_add(self.config.max_transmux_segments)
                .min(count)
        } else {
            count
        };

        let session = TranscodingSession::create(SessionParams {
            output_root: self.config.output_root.clone(),
            source: source.to_path_buf(),
            stream_rep: Arc::clone(stream_rep),
            start_segment: start,
            end_segment: end,
            segment_duration_secs: self.config.segment_duration_secs,
            callback_base: self.config.callback_base.clone(),
            terminate_grace: self.config.terminate_grace,
        })
        .await?;

        if let Err(e) = session.start(self.launcher.as_ref()) {
            session.destroy().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Apply an encoder progress report. Returns whether the session was
    /// throttled as a result.
    pub async fn on_progress(&self, id: TranscodeSessionId, report: ProgressReport) -> bool {
        let Some(entry) = self.by_transcode.get(&id).and_then(|weak| weak.upgrade()) else {
            tracing::debug!(session_id = %id, "Progress for unknown transcoding session");
            return false;
        };

        let (session, consumed) = {
            let state = entry.state.lock().await;
            match state.session.as_ref() {
                Some(session) if session.id() == id => (Arc::clone(session), state.last_served),
                _ => return false,
            }
        };

        let ended = report.ended;
        session.record_progress(report);
        if ended || session.is_exited() {
            return false;
        }

        let produced = match session.available_segments().await {
            Ok(available) => available.highest_on_disk,
            Err(e) => {
                tracing::debug!(session_id = %id, error = %e, "Cannot list segments for throttling");
                return false;
            }
        };

        if should_throttle(
            produced,
            consumed,
            session.start_segment(),
            self.config.throttle_ahead_segments,
        ) {
            return session.throttle();
        }
        false
    }

    /// Destroy sessions nobody holds that have been idle past the timeout.
    /// Returns the number of playback sessions removed.
    pub async fn cleanup_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;

        let candidates: Vec<(PlaybackSessionKey, Arc<PlaybackEntry>)> = self
            .entries
            .iter()
            .filter(|e| e.value().refs() == 0 && e.value().idle_for(now) >= idle_timeout)
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut removed = 0;
        for (key, entry) in candidates {
            // Busy entries are in use; skip them this round.
            let Ok(mut state) = entry.state.try_lock() else {
                continue;
            };
            if entry.refs() != 0 || entry.idle_for(now) < idle_timeout {
                continue;
            }
            state.retired = true;
            let session = state.session.take();
            drop(state);

            self.entries.remove_if(&key, |_, current| Arc::ptr_eq(current, &entry));
            removed += 1;

            if let Some(session) = session {
                self.by_transcode.remove(&session.id());
                tracing::info!(key = %key, session_id = %session.id(), "Destroying idle playback session");
                session.destroy().await;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Cleaned up idle playback sessions");
        }
        removed
    }

    /// Destroy every session, waiting at most `timeout`.
    ///
    /// Sessions still tearing down at the deadline are logged and counted as
    /// leaked; they are not retried.
    pub async fn destroy_all(&self, timeout: Duration) -> ShutdownSummary {
        let entries: Vec<Arc<PlaybackEntry>> =
            self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        self.entries.clear();
        self.by_transcode.clear();

        let mut tasks = JoinSet::new();
        for entry in entries {
            tasks.spawn(async move {
                let session = {
                    let mut state = entry.state.lock().await;
                    state.retired = true;
                    entry.bound.notify_waiters();
                    state.session.take()
                };
                match session {
                    Some(session) => {
                        session.destroy().await;
                        true
                    }
                    None => false,
                }
            });
        }

        let mut summary = ShutdownSummary::default();
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(true) => summary.destroyed += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "Session teardown task failed"),
                }
            }
        })
        .await;

        if drained.is_err() {
            summary.leaked = tasks.len();
            tracing::warn!(
                leaked = summary.leaked,
                timeout_secs = timeout.as_secs(),
                "Transcoding sessions did not shut down in time"
            );
            tasks.detach_all();
        }

        tracing::info!(destroyed = summary.destroyed, leaked = summary.leaked, "All playback sessions destroyed");
        summary
    }

    /// Outstanding references on a playback session.
    pub fn ref_count(&self, key: &PlaybackSessionKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.value().refs())
    }

    /// Current transcoding session of a playback session.
    pub async fn current_session(&self, key: &PlaybackSessionKey) -> Option<Arc<TranscodingSession>> {
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        let state = entry.state.lock().await;
        state.session.clone()
    }

    /// Number of playback sessions in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Start a background task that periodically destroys idle sessions.
pub fn start_cleanup_task(
    manager: Arc<PlaybackManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    manager.cleanup_idle().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("Session cleanup task stopped");
    })
}
