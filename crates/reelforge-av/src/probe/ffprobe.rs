//! FFprobe-based media inspection.

use super::types::*;
use super::MediaInspector;
use crate::command::ToolCommand;
use async_trait::async_trait;
use reelforge_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    #[serde(default)]
    codec_type: String,
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i32>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    time_base: Option<String>,
    duration_ts: Option<i64>,
    duration: Option<String>,
    bit_rate: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFrames {
    #[serde(default)]
    frames: Vec<FfprobeFrame>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFrame {
    pts: Option<i64>,
}

/// [`MediaInspector`] backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfprobeInspector {
    /// Create an inspector using the given `ffprobe` binary.
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Override the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    async fn inspect(&self, path: &Path) -> Result<ProbeContainer> {
        let output = ToolCommand::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
            .execute()
            .await
            .map_err(|e| Error::probe_failure(path.display(), e.to_string()))?;

        parse_probe_output(&output.stdout)
            .map_err(|e| Error::probe_failure(path.display(), e.to_string()))
    }

    async fn keyframes(&self, path: &Path, stream_index: u32) -> Result<Vec<i64>> {
        let output = ToolCommand::new(&self.ffprobe)
            .args(["-v", "quiet", "-select_streams"])
            .arg(stream_index.to_string())
            .args(["-skip_frame", "nokey", "-show_entries", "frame=pts", "-of", "json"])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
            .execute()
            .await
            .map_err(|e| Error::probe_failure(path.display(), e.to_string()))?;

        parse_keyframes(&output.stdout)
            .map_err(|e| Error::probe_failure(path.display(), e.to_string()))
    }
}

/// Parse `-show_format -show_streams` JSON output.
pub fn parse_probe_output(json: &[u8]) -> std::result::Result<ProbeContainer, serde_json::Error> {
    let output: FfprobeOutput = serde_json::from_slice(json)?;

    let format = ProbeFormat {
        format_name: output.format.format_name,
        duration: output.format.duration.and_then(|s| s.parse().ok()),
        size: output.format.size.and_then(|s| s.parse().ok()),
        bit_rate: output.format.bit_rate.and_then(|s| s.parse().ok()),
    };

    let streams = output
        .streams
        .into_iter()
        .map(|s| ProbeStream {
            index: s.index,
            codec_type: s.codec_type,
            codec_name: s.codec_name,
            profile: s.profile,
            level: s.level,
            width: s.width,
            height: s.height,
            avg_frame_rate: s.avg_frame_rate,
            r_frame_rate: s.r_frame_rate,
            time_base: s.time_base,
            duration_ts: s.duration_ts,
            duration: s.duration.and_then(|d| d.parse().ok()),
            bit_rate: s.bit_rate.and_then(|b| b.parse().ok()),
            channels: s.channels,
            language: s.tags.language,
            title: s.tags.title,
            default: s.disposition.default == 1,
            attached_pic: s.disposition.attached_pic == 1,
        })
        .collect();

    Ok(ProbeContainer { format, streams })
}

/// Parse keyframe timestamps, sorted and deduplicated.
pub fn parse_keyframes(json: &[u8]) -> std::result::Result<Vec<i64>, serde_json::Error> {
    let output: FfprobeFrames = serde_json::from_slice(json)?;
    let mut pts: Vec<i64> = output.frames.into_iter().filter_map(|f| f.pts).collect();
    pts.sort_unstable();
    pts.dedup();
    Ok(pts)
}
