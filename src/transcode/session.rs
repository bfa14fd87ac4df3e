//! A single encoder run and the segment files it produces.

use super::command::{segment_extension, EncoderJob, INIT_SEGMENT, SEGMENT_PREFIX};
use super::launcher::EncoderLauncher;
use super::progress::ProgressReport;
use parking_lot::Mutex;
use reelforge_av::ProcessHandle;
use reelforge_common::{Error, Result, TranscodeSessionId};
use reelforge_media::StreamRepresentation;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a transcoding session.
///
/// `New -> Running -> {Throttled <-> Running} -> Stopping -> Exited`; any
/// state moves to `Exited` when the process ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Running,
    Throttled,
    Stopping,
    Exited,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Throttled => "throttled",
            Self::Stopping => "stopping",
            Self::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// Everything needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Parent of the per-session output directory.
    pub output_root: PathBuf,
    /// Absolute path of the source file.
    pub source: PathBuf,
    /// What to produce.
    pub stream_rep: Arc<StreamRepresentation>,
    /// First client-visible segment index.
    pub start_segment: u32,
    /// One past the last segment index the run produces.
    pub end_segment: u32,
    /// Nominal segment length in seconds.
    pub segment_duration_secs: f64,
    /// Base URL for progress callbacks; no callback when absent.
    pub callback_base: Option<String>,
    /// Time between terminate and kill.
    pub terminate_grace: Duration,
}

/// Segment files found in a session's output directory.
#[derive(Debug, Clone, Default)]
pub struct AvailableSegments {
    /// Container header, once it is safe to serve.
    pub init: Option<PathBuf>,
    /// Client-visible segment index to file.
    pub segments: BTreeMap<u32, PathBuf>,
    /// Highest segment index on disk, including one still being written.
    pub highest_on_disk: Option<u32>,
}

impl AvailableSegments {
    /// File for a segment index.
    pub fn get(&self, index: u32) -> Option<&Path> {
        self.segments.get(&index).map(PathBuf::as_path)
    }
}

/// One encoder process writing one representation into a private directory.
pub struct TranscodingSession {
    id: TranscodeSessionId,
    stream_rep: Arc<StreamRepresentation>,
    source: PathBuf,
    output_dir: PathBuf,
    start_segment: u32,
    end_segment: u32,
    segment_duration_secs: f64,
    progress_url: Option<String>,
    terminate_grace: Duration,
    state: Mutex<SessionState>,
    process: Mutex<Option<Arc<dyn ProcessHandle>>>,
    progress: Mutex<Option<ProgressReport>>,
    destroyed: AtomicBool,
}

impl fmt::Debug for TranscodingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodingSession")
            .field("id", &self.id)
            .field("representation", &self.stream_rep.representation.id)
            .field("start_segment", &self.start_segment)
            .field("end_segment", &self.end_segment)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl TranscodingSession {
    /// Create a session and its output directory.
    ///
    /// The directory is named after the session id and created with
    /// `create_dir`, so it never collides with another session's.
    pub async fn create(params: SessionParams) -> Result<Arc<Self>> {
        let id = TranscodeSessionId::new();

        tokio::fs::create_dir_all(&params.output_root)
            .await
            .map_err(|e| Error::directory(&params.output_root, e))?;
        let output_dir = params.output_root.join(format!("session-{id}"));
        tokio::fs::create_dir(&output_dir)
            .await
            .map_err(|e| Error::directory(&output_dir, e))?;

        let progress_url = params
            .callback_base
            .map(|base| format!("{base}/internal/transcoder/{id}/progress"));

        Ok(Arc::new(Self {
            id,
            stream_rep: params.stream_rep,
            source: params.source,
            output_dir,
            start_segment: params.start_segment,
            end_segment: params.end_segment,
            segment_duration_secs: params.segment_duration_secs,
            progress_url,
            terminate_grace: params.terminate_grace,
            state: Mutex::new(SessionState::New),
            process: Mutex::new(None),
            progress: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Launch the encoder and start watching for its exit.
    ///
    /// # Errors
    ///
    /// [`Error::SpawnError`] if the process cannot be started; the session
    /// is then `Exited`.
    pub fn start(self: &Arc<Self>, launcher: &dyn EncoderLauncher) -> Result<()> {
        let job = self.job();
        let process: Arc<dyn ProcessHandle> = match launcher.launch(&job) {
            Ok(process) => Arc::from(process),
            Err(e) => {
                *self.state.lock() = SessionState::Exited;
                return Err(e);
            }
        };

        *self.process.lock() = Some(Arc::clone(&process));
        *self.state.lock() = SessionState::Running;

        tracing::info!(
            session_id = %self.id,
            representation = %self.stream_rep.representation.id,
            stream = self.stream_rep.stream.index,
            start = self.start_segment,
            end = self.end_segment,
            pid = ?process.pid(),
            "Transcoding session started"
        );

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let exit = process.wait().await;
            if let Some(session) = weak.upgrade() {
                *session.state.lock() = SessionState::Exited;
                if exit.success {
                    tracing::debug!(session_id = %session.id, %exit, "Encoder finished");
                } else if !session.destroyed.load(Ordering::Acquire) {
                    tracing::warn!(session_id = %session.id, %exit, "Encoder exited with failure");
                }
            }
        });

        Ok(())
    }

    fn job(&self) -> EncoderJob {
        EncoderJob {
            session_id: self.id,
            source: self.source.clone(),
            stream_rep: Arc::clone(&self.stream_rep),
            start_segment: self.start_segment,
            end_segment: self.end_segment,
            output_dir: self.output_dir.clone(),
            segment_duration_secs: self.segment_duration_secs,
            progress_url: self.progress_url.clone(),
        }
    }

    pub fn id(&self) -> TranscodeSessionId {
        self.id
    }

    pub fn stream_rep(&self) -> &Arc<StreamRepresentation> {
        &self.stream_rep
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// First client-visible segment index produced by this run.
    pub fn start_segment(&self) -> u32 {
        self.start_segment
    }

    /// One past the last segment index produced by this run.
    pub fn end_segment(&self) -> u32 {
        self.end_segment
    }

    /// Whether `index` falls inside the range this run produces.
    pub fn covers(&self, index: u32) -> bool {
        (self.start_segment..self.end_segment).contains(&index)
    }

    fn process(&self) -> Option<Arc<dyn ProcessHandle>> {
        self.process.lock().clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        let state = *self.state.lock();
        match self.process() {
            Some(process) if state != SessionState::Exited && process.try_exit().is_some() => {
                SessionState::Exited
            }
            _ => state,
        }
    }

    pub fn is_exited(&self) -> bool {
        self.state() == SessionState::Exited
    }

    pub fn is_throttled(&self) -> bool {
        self.state() == SessionState::Throttled
    }

    /// Pause the encoder. Returns whether the session is now throttled.
    ///
    /// Signal failures are logged only.
    pub fn throttle(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Running {
            return *state == SessionState::Throttled;
        }
        let Some(process) = self.process() else {
            return false;
        };
        match process.pause() {
            Ok(()) => {
                *state = SessionState::Throttled;
                tracing::info!(session_id = %self.id, "Transcoding session throttled");
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to pause encoder");
                false
            }
        }
    }

    /// Resume a throttled encoder. Returns whether the session is running.
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Throttled {
            return *state == SessionState::Running;
        }
        let Some(process) = self.process() else {
            return false;
        };
        match process.resume() {
            Ok(()) => {
                *state = SessionState::Running;
                tracing::info!(session_id = %self.id, "Transcoding session resumed");
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to resume encoder");
                false
            }
        }
    }

    /// Store the latest progress report.
    pub fn record_progress(&self, report: ProgressReport) {
        tracing::trace!(
            session_id = %self.id,
            frame = ?report.frame,
            out_time = ?report.out_time,
            "Encoder progress"
        );
        *self.progress.lock() = Some(report);
    }

    /// Latest progress report.
    pub fn last_progress(&self) -> Option<ProgressReport> {
        self.progress.lock().clone()
    }

    /// Stop the process group and delete the output directory.
    ///
    /// Both steps are best-effort: failures are logged and never returned.
    /// Calling this more than once is a no-op.
    pub async fn destroy(&self) {
        if self.mark_destroyed() {
            self.teardown().await;
        }
    }

    /// Mark the session destroyed right away and finish tearing it down on a
    /// background task.
    pub fn destroy_detached(self: &Arc<Self>) {
        if self.mark_destroyed() {
            let session = Arc::clone(self);
            tokio::spawn(async move { session.teardown().await });
        }
    }

    /// Flag the session as destroyed; false if it already was.
    fn mark_destroyed(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut state = self.state.lock();
        if *state != SessionState::Exited {
            *state = SessionState::Stopping;
        }
        true
    }

    async fn teardown(&self) {
        if let Some(process) = self.process() {
            if let Err(e) = process.terminate(self.terminate_grace).await {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to stop encoder");
            }
        }
        *self.state.lock() = SessionState::Exited;

        match tokio::fs::remove_dir_all(&self.output_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    path = %self.output_dir.display(),
                    error = %e,
                    "Failed to remove session directory"
                );
            }
        }

        tracing::info!(session_id = %self.id, "Transcoding session destroyed");
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Segments that are complete and safe to serve.
    ///
    /// The highest-numbered segment on disk is left out until the encoder
    /// has exited, since it may still be written to. The init segment is
    /// reported once any media segment exists.
    ///
    /// # Errors
    ///
    /// [`Error::DirectoryAccess`] if the output directory cannot be listed.
    pub async fn available_segments(&self) -> Result<AvailableSegments> {
        // Checked before listing so a file seen as in-progress stays excluded.
        let exited = self.is_exited();

        let mut available = self.scan().await?;
        available.highest_on_disk = available.segments.keys().next_back().copied();

        if !exited {
            if let Some(highest) = available.highest_on_disk {
                available.segments.remove(&highest);
            } else {
                available.init = None;
            }
        }

        Ok(available)
    }

    async fn scan(&self) -> Result<AvailableSegments> {
        let mut dir = tokio::fs::read_dir(&self.output_dir)
            .await
            .map_err(|e| Error::directory(&self.output_dir, e))?;

        let extension = segment_extension(self.stream_rep.stream_type());
        let mut found = AvailableSegments::default();

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::directory(&self.output_dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if name == INIT_SEGMENT {
                found.init = Some(entry.path());
                continue;
            }

            if let Some(n) = parse_segment_number(name, extension) {
                let index = self.start_segment.saturating_add(n);
                if index < self.end_segment {
                    found.segments.insert(index, entry.path());
                }
            }
        }

        Ok(found)
    }
}

/// Parse `stream0_<n>.<extension>` into `n`.
pub fn parse_segment_number(name: &str, extension: &str) -> Option<u32> {
    let rest = name.strip_prefix(SEGMENT_PREFIX)?;
    let digits = rest.strip_suffix(extension)?.strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
