use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL the encoder uses to reach the progress endpoint
    /// (default: `http://127.0.0.1:{port}`)
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL for callbacks from encoder processes, without trailing slash.
    pub fn callback_base(&self) -> String {
        match self.public_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => format!("http://127.0.0.1:{}", self.port),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Directory file locators are resolved against
    #[serde(default = "default_library_root")]
    pub root: PathBuf,
}

fn default_library_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Parent directory for per-session output directories (default: system temp)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Target segment length in seconds (default: 5)
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: f64,

    /// Segments produced by one transmux run before a new run is needed (default: 12)
    #[serde(default = "default_max_transmux_segments")]
    pub max_transmux_segments: u32,

    /// How far ahead of the last request a segment may be and still reuse
    /// the running session (default: 5)
    #[serde(default = "default_reuse_window")]
    pub reuse_window: u32,

    /// Produced-but-unserved segments before the encoder is paused (default: 8)
    #[serde(default = "default_throttle_ahead")]
    pub throttle_ahead_segments: u32,

    /// How long a segment request waits for the encoder (default: 20)
    #[serde(default = "default_segment_timeout")]
    pub segment_timeout_secs: u64,

    /// Deadline for destroying every session on shutdown (default: 15)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Unreferenced sessions idle longer than this are destroyed (default: 120)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the idle cleanup task runs (default: 30)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Time between SIGTERM and SIGKILL when stopping an encoder (default: 5)
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,

    /// How long an init request with no running encoder waits for the
    /// player's first media request to pick the start segment (default: 1000)
    #[serde(default = "default_init_handoff")]
    pub init_handoff_ms: u64,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("reelforge")
}
fn default_segment_duration() -> f64 {
    5.0
}
fn default_max_transmux_segments() -> u32 {
    12
}
fn default_reuse_window() -> u32 {
    5
}
fn default_throttle_ahead() -> u32 {
    8
}
fn default_segment_timeout() -> u64 {
    20
}
fn default_shutdown_timeout() -> u64 {
    15
}
fn default_idle_timeout() -> u64 {
    120
}
fn default_cleanup_interval() -> u64 {
    30
}
fn default_terminate_grace() -> u64 {
    5
}
fn default_init_handoff() -> u64 {
    1000
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            segment_duration_secs: default_segment_duration(),
            max_transmux_segments: default_max_transmux_segments(),
            reuse_window: default_reuse_window(),
            throttle_ahead_segments: default_throttle_ahead(),
            segment_timeout_secs: default_segment_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
            terminate_grace_secs: default_terminate_grace(),
            init_handoff_ms: default_init_handoff(),
        }
    }
}

impl TranscodeConfig {
    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn init_handoff(&self) -> Duration {
        Duration::from_millis(self.init_handoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum cached representations (default: 256)
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Seconds before a cached representation is recomputed (default: 3600)
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_entries() -> usize {
    256
}
fn default_cache_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
