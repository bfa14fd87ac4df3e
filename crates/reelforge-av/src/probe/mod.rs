//! Stream probing.
//!
//! A [`MediaInspector`] wraps the external inspection tool. The [`Prober`]
//! sits in front of it, caches raw results per file, and derives
//! [`Stream`](reelforge_common::Stream) facts on demand.

mod cache;
mod codec;
mod ffprobe;
mod types;

pub use cache::Prober;
pub use codec::codec_string;
pub use ffprobe::{parse_keyframes, parse_probe_output, FfprobeInspector};
pub use types::*;

use async_trait::async_trait;
use reelforge_common::Result;
use std::path::Path;

/// Backend that reads technical metadata out of a media file.
#[async_trait]
pub trait MediaInspector: Send + Sync + 'static {
    /// Inspect the container and all of its streams.
    async fn inspect(&self, path: &Path) -> Result<ProbeContainer>;

    /// Keyframe timestamps of one stream, in that stream's time base ticks.
    async fn keyframes(&self, path: &Path, stream_index: u32) -> Result<Vec<i64>>;
}
