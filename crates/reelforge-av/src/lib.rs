//! # reelforge-av
//!
//! External tool plumbing for the playback engine.
//!
//! This crate provides functionality for:
//! - Probing media files into per-stream facts with a result cache ([`Prober`])
//! - Scanning keyframe timestamps for keyframe-aligned segmenting
//! - Locating `ffmpeg`/`ffprobe` ([`Toolchain`])
//! - Supervising encoder subprocesses as process groups ([`SupervisedProcess`])
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reelforge_av::{FfprobeInspector, Prober};
//! use reelforge_common::FileLocator;
//!
//! # async fn example() -> reelforge_common::Result<()> {
//! let prober = Prober::new(Arc::new(FfprobeInspector::new("ffprobe")), "/srv/media");
//! let locator = FileLocator::from_relative_path("movies/film.mkv")?;
//! for stream in prober.streams(&locator).await? {
//!     println!("{} {} {}bps", stream.index, stream.codec, stream.bitrate);
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod probe;
pub mod process;
pub mod tools;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use probe::{FfprobeInspector, MediaInspector, ProbeContainer, ProbeFormat, ProbeStream, Prober};
pub use process::{ProcessExit, ProcessHandle, SupervisedProcess};
pub use tools::{check_tool_with_arg, check_tools, get_tool_path, require_tool, ToolInfo, Toolchain};
