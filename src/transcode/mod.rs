//! Encoder runs.
//!
//! A [`TranscodingSession`] owns one encoder process and the directory it
//! writes segments into. Sessions are created and evicted by the playback
//! manager; nothing here decides when a run should start or stop.

pub mod command;
pub mod launcher;
pub mod progress;
pub mod session;

pub use command::{build_args, segment_file_name, EncoderJob, INIT_SEGMENT, SEGMENT_PREFIX};
pub use launcher::{EncoderLauncher, FfmpegLauncher, ENCODER_LOG};
pub use progress::{ProgressParser, ProgressReport};
pub use session::{AvailableSegments, SessionParams, SessionState, TranscodingSession};
