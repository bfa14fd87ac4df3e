//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] around a fake
//! media inspector and a fake encoder launcher, backed by temporary library
//! and output directories. The [`TestHarness::with_server`] constructor
//! starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

use reelforge::config::Config;
use reelforge::playback::PlaybackSessionKey;
use reelforge::server::{create_router, AppContext};
use reelforge::streaming::stream_representation;
use reelforge::transcode::{segment_file_name, EncoderJob, EncoderLauncher, INIT_SEGMENT};
use reelforge_av::{MediaInspector, ProbeContainer, ProbeFormat, ProbeStream, ProcessExit, ProcessHandle};
use reelforge_common::{Error, FileLocator, PlayerSessionId, Result, StreamKey, StreamType};
use reelforge_media::{RepresentationId, StreamRepresentation};

/// Relative path of the media file every harness serves.
pub const MOVIE: &str = "movies/movie.mkv";

/// Stream indices of the fake movie.
pub const VIDEO: u32 = 0;
pub const AUDIO: u32 = 1;
pub const SUBTITLE: u32 = 2;

/// Duration of the fake movie in seconds.
pub const MOVIE_SECS: f64 = 300.0;

// ---------------------------------------------------------------------------
// Fake inspector
// ---------------------------------------------------------------------------

/// Inspector returning a fixed three-stream movie for any path.
pub struct FakeInspector {
    container: ProbeContainer,
    /// Keyframe spacing in milliseconds.
    keyframe_interval: i64,
    pub inspections: AtomicUsize,
    pub keyframe_scans: AtomicUsize,
}

impl FakeInspector {
    pub fn movie() -> Self {
        let video = ProbeStream {
            index: VIDEO,
            codec_type: "video".into(),
            codec_name: Some("h264".into()),
            profile: Some("High".into()),
            level: Some(40),
            width: Some(1920),
            height: Some(1080),
            avg_frame_rate: Some("24/1".into()),
            time_base: Some("1/1000".into()),
            duration: Some(MOVIE_SECS),
            bit_rate: Some(6_000_000),
            default: true,
            ..Default::default()
        };
        let audio = ProbeStream {
            index: AUDIO,
            codec_type: "audio".into(),
            codec_name: Some("aac".into()),
            profile: Some("LC".into()),
            time_base: Some("1/1000".into()),
            duration: Some(MOVIE_SECS),
            bit_rate: Some(192_000),
            channels: Some(2),
            language: Some("eng".into()),
            default: true,
            ..Default::default()
        };
        let subtitle = ProbeStream {
            index: SUBTITLE,
            codec_type: "subtitle".into(),
            codec_name: Some("subrip".into()),
            time_base: Some("1/1000".into()),
            duration: Some(MOVIE_SECS),
            language: Some("eng".into()),
            ..Default::default()
        };

        Self {
            container: ProbeContainer {
                format: ProbeFormat {
                    format_name: "matroska,webm".into(),
                    duration: Some(MOVIE_SECS),
                    size: None,
                    bit_rate: None,
                },
                streams: vec![video, audio, subtitle],
            },
            keyframe_interval: 2000,
            inspections: AtomicUsize::new(0),
            keyframe_scans: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaInspector for FakeInspector {
    async fn inspect(&self, _path: &Path) -> Result<ProbeContainer> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.container.clone())
    }

    async fn keyframes(&self, _path: &Path, _stream_index: u32) -> Result<Vec<i64>> {
        self.keyframe_scans.fetch_add(1, Ordering::SeqCst);
        let end = (MOVIE_SECS * 1000.0) as i64;
        Ok((0..end).step_by(self.keyframe_interval as usize).collect())
    }
}

// ---------------------------------------------------------------------------
// Fake encoder
// ---------------------------------------------------------------------------

/// Process stand-in that runs until terminated or told to exit.
#[derive(Debug)]
pub struct FakeProcess {
    exit_tx: watch::Sender<Option<ProcessExit>>,
    paused: Arc<AtomicBool>,
    terminations: Arc<AtomicUsize>,
    terminate_delay: Duration,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self, _grace: Duration) -> Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if !self.terminate_delay.is_zero() {
            tokio::time::sleep(self.terminate_delay).await;
        }
        self.exit_tx.send_if_modified(|exit| {
            if exit.is_some() {
                return false;
            }
            *exit = Some(ProcessExit {
                code: None,
                success: false,
            });
            true
        });
        Ok(())
    }

    async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(exit) = *rx.borrow_and_update() {
                return exit;
            }
            if rx.changed().await.is_err() {
                return ProcessExit {
                    code: None,
                    success: false,
                };
            }
        }
    }

    fn try_exit(&self) -> Option<ProcessExit> {
        *self.exit_tx.borrow()
    }
}

/// What the fake encoder does when launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderBehavior {
    /// Write this many segments and keep running.
    Produce(u32),
    /// Write this many segments and exit successfully.
    ProduceAndExit(u32),
    /// Start but never write anything.
    Stall,
    /// Fail to spawn.
    FailSpawn,
}

/// One launched fake encoder.
pub struct LaunchRecord {
    pub job: EncoderJob,
    pub paused: Arc<AtomicBool>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
}

impl LaunchRecord {
    /// Make the process exit with `code`.
    pub fn exit(&self, code: i32) {
        self.exit_tx.send_replace(Some(ProcessExit {
            code: Some(code),
            success: code == 0,
        }));
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Launcher that writes segment files synchronously instead of encoding.
pub struct FakeLauncher {
    behavior: Mutex<EncoderBehavior>,
    terminate_delay: Mutex<Duration>,
    pub launches: Mutex<Vec<LaunchRecord>>,
    pub terminations: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(behavior: EncoderBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            terminate_delay: Mutex::new(Duration::ZERO),
            launches: Mutex::new(Vec::new()),
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_behavior(&self, behavior: EncoderBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make every process launched from now on take `delay` to terminate.
    pub fn set_terminate_delay(&self, delay: Duration) {
        *self.terminate_delay.lock() = delay;
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    pub fn termination_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Start segment of every launched run, in launch order.
    pub fn start_segments(&self) -> Vec<u32> {
        self.launches.lock().iter().map(|l| l.job.start_segment).collect()
    }

    /// Whether the most recent run is paused.
    pub fn last_paused(&self) -> bool {
        self.launches.lock().last().is_some_and(LaunchRecord::is_paused)
    }

    /// Make the most recent run exit with `code`.
    pub fn exit_last(&self, code: i32) {
        if let Some(record) = self.launches.lock().last() {
            record.exit(code);
        }
    }

    /// Write `count` more local segments for the most recent run.
    pub fn produce_more(&self, from: u32, count: u32) {
        if let Some(record) = self.launches.lock().last() {
            write_segments(&record.job, from, count);
        }
    }
}

impl EncoderLauncher for FakeLauncher {
    fn launch(&self, job: &EncoderJob) -> Result<Box<dyn ProcessHandle>> {
        let behavior = *self.behavior.lock();
        let count = match behavior {
            EncoderBehavior::FailSpawn => {
                return Err(Error::spawn("ffmpeg", "No such file or directory"));
            }
            EncoderBehavior::Stall => 0,
            EncoderBehavior::Produce(n) | EncoderBehavior::ProduceAndExit(n) => n,
        };

        write_segments(job, 0, count);

        let (exit_tx, _) = watch::channel(None);
        if matches!(behavior, EncoderBehavior::ProduceAndExit(_)) {
            exit_tx.send_replace(Some(ProcessExit {
                code: Some(0),
                success: true,
            }));
        }

        let paused = Arc::new(AtomicBool::new(false));
        self.launches.lock().push(LaunchRecord {
            job: job.clone(),
            paused: Arc::clone(&paused),
            exit_tx: exit_tx.clone(),
        });

        Ok(Box::new(FakeProcess {
            exit_tx,
            paused,
            terminations: Arc::clone(&self.terminations),
            terminate_delay: *self.terminate_delay.lock(),
        }))
    }
}

/// Write local segments `[from, from + count)` of a job, capped at its end.
pub fn write_segments(job: &EncoderJob, from: u32, count: u32) {
    let stream_type = job.stream_rep.stream_type();
    let run_length = job.end_segment.saturating_sub(job.start_segment);
    let to = from.saturating_add(count).min(run_length);

    if stream_type != StreamType::Subtitle && to > from {
        std::fs::write(job.output_dir.join(INIT_SEGMENT), b"ftypinit").unwrap();
    }
    for n in from..to {
        let body = match stream_type {
            StreamType::Subtitle => format!("WEBVTT\n\n{n}\n").into_bytes(),
            _ => fragment(n + 1),
        };
        std::fs::write(job.output_dir.join(segment_file_name(n, stream_type)), body).unwrap();
    }
}

/// A minimal `moof { mfhd } mdat` fragment.
pub fn fragment(sequence: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&24u32.to_be_bytes());
    data.extend_from_slice(b"moof");
    data.extend_from_slice(&16u32.to_be_bytes());
    data.extend_from_slice(b"mfhd");
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(&sequence.to_be_bytes());
    data.extend_from_slice(&12u32.to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend_from_slice(b"data");
    data
}

/// Poll `cond` until it holds or a few seconds pass. Returns its last value.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub inspector: Arc<FakeInspector>,
    pub launcher: Arc<FakeLauncher>,
    pub locator: FileLocator,
    library: TempDir,
    output: TempDir,
}

impl TestHarness {
    /// Default configuration, encoder writes four segments per run.
    pub fn new() -> Self {
        Self::with_config(Config::default(), EncoderBehavior::Produce(4))
    }

    /// Default configuration with a specific encoder behavior.
    pub fn with_behavior(behavior: EncoderBehavior) -> Self {
        Self::with_config(Config::default(), behavior)
    }

    /// Custom configuration; library root and output directory are always
    /// replaced by temporary directories.
    pub fn with_config(mut config: Config, behavior: EncoderBehavior) -> Self {
        let library = tempfile::tempdir().expect("failed to create library dir");
        let output = tempfile::tempdir().expect("failed to create output dir");

        let movie = library.path().join(MOVIE);
        std::fs::create_dir_all(movie.parent().unwrap()).unwrap();
        std::fs::write(&movie, vec![0u8; 4096]).unwrap();

        config.library.root = library.path().to_path_buf();
        config.transcode.temp_dir = output.path().join("sessions");

        let inspector = Arc::new(FakeInspector::movie());
        let launcher = Arc::new(FakeLauncher::new(behavior));
        let ctx = AppContext::new(
            config,
            Arc::clone(&inspector) as Arc<dyn MediaInspector>,
            Arc::clone(&launcher) as Arc<dyn EncoderLauncher>,
        );
        let locator = FileLocator::from_relative_path(MOVIE).unwrap();

        Self {
            ctx,
            inspector,
            launcher,
            locator,
            library,
            output,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config, behavior: EncoderBehavior) -> (Self, SocketAddr) {
        Self::with_config(config, behavior).serve().await
    }

    async fn serve(self) -> (Self, SocketAddr) {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    /// Absolute path of the fake movie.
    pub fn source(&self) -> PathBuf {
        self.library.path().join(MOVIE)
    }

    /// Parent of every session output directory.
    pub fn output_root(&self) -> PathBuf {
        self.output.path().join("sessions")
    }

    /// Number of session directories currently on disk.
    pub fn session_dirs(&self) -> usize {
        match std::fs::read_dir(self.output_root()) {
            Ok(dir) => dir.filter_map(|e| e.ok()).count(),
            Err(_) => 0,
        }
    }

    pub fn stream_key(&self, index: u32) -> StreamKey {
        StreamKey::new(self.locator.clone(), index)
    }

    pub fn key(&self, index: u32, representation: &str, player: &str) -> PlaybackSessionKey {
        PlaybackSessionKey {
            stream: self.stream_key(index),
            representation: representation.parse().unwrap(),
            player: player.parse::<PlayerSessionId>().unwrap(),
        }
    }

    /// Resolve a representation through the context, as the handlers do.
    pub async fn stream_rep(&self, index: u32, representation: &str) -> Arc<StreamRepresentation> {
        let id: RepresentationId = representation.parse().unwrap();
        stream_representation(&self.ctx, &self.stream_key(index), &id)
            .await
            .unwrap()
    }

    /// URL prefix of the fake movie for a player session.
    pub fn file_url(&self, addr: SocketAddr, player: &str) -> String {
        format!("http://{addr}/files/{}/{player}", self.locator)
    }
}
