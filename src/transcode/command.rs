//! Encoder command line construction.
//!
//! Every run writes into its own directory: `init.mp4` plus
//! `stream0_<n>.m4s` for audio and video, or `stream0_<n>.vtt` for subtitles,
//! with `n` counted from the first segment of the run.

use reelforge_common::{StreamType, TranscodeSessionId};
use reelforge_media::{Delivery, StreamRepresentation};
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the container header segment.
pub const INIT_SEGMENT: &str = "init.mp4";
/// Prefix shared by all numbered segment files.
pub const SEGMENT_PREFIX: &str = "stream0_";
/// One fragment per segment, flushed by the segment muxer at every cut.
const FRAGMENT_FLAGS: &str = "movflags=+frag_custom+empty_moov+default_base_moof";

/// One encoder run producing segments `[start_segment, end_segment)`.
#[derive(Debug, Clone)]
pub struct EncoderJob {
    /// Session the run belongs to.
    pub session_id: TranscodeSessionId,
    /// Absolute path of the source file.
    pub source: PathBuf,
    /// What to produce.
    pub stream_rep: Arc<StreamRepresentation>,
    /// First client-visible segment index.
    pub start_segment: u32,
    /// One past the last segment index.
    pub end_segment: u32,
    /// Private output directory; also the working directory of the process.
    pub output_dir: PathBuf,
    /// Nominal segment length in seconds.
    pub segment_duration_secs: f64,
    /// Where the encoder posts progress reports.
    pub progress_url: Option<String>,
}

impl EncoderJob {
    /// Start offset into the source in seconds.
    pub fn start_secs(&self) -> f64 {
        self.stream_rep
            .segment_start_secs(self.start_segment)
            .unwrap_or(0.0)
    }

    /// Length of media covered by this run in seconds, if bounded before
    /// the end of the stream.
    pub fn duration_secs(&self) -> Option<f64> {
        if self.end_segment >= self.stream_rep.segment_count() {
            return None;
        }
        let end = self.stream_rep.segment_start_secs(self.end_segment)?;
        Some((end - self.start_secs()).max(0.0))
    }

    /// Cut points of the run in seconds, taken from the segment plan.
    ///
    /// Timestamps leave the encoder shifted back to source time, so these are
    /// the absolute starts of segments `start_segment + 1 .. end_segment`.
    pub fn segment_boundaries(&self) -> Vec<f64> {
        (self.start_segment.saturating_add(1)..self.end_segment)
            .filter_map(|index| self.stream_rep.segment_start_secs(index))
            .collect()
    }

    /// File extension of numbered segments.
    pub fn segment_extension(&self) -> &'static str {
        segment_extension(self.stream_rep.stream_type())
    }
}

/// File extension of numbered segments for a stream type.
pub fn segment_extension(stream_type: StreamType) -> &'static str {
    match stream_type {
        StreamType::Subtitle => "vtt",
        StreamType::Video | StreamType::Audio => "m4s",
    }
}

/// File name of the `n`-th segment of a run.
pub fn segment_file_name(n: u32, stream_type: StreamType) -> String {
    format!("{SEGMENT_PREFIX}{n}.{}", segment_extension(stream_type))
}

/// Build the ffmpeg argument list for a job.
pub fn build_args(job: &EncoderJob) -> Vec<String> {
    let sr = &job.stream_rep;
    let stream = &sr.stream;
    let segment_time = format!("{:.3}", job.segment_duration_secs);

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
    ];

    if let Some(ref url) = job.progress_url {
        args.extend(["-progress".into(), url.clone(), "-nostats".into()]);
    }

    // Input seeking
    let start = job.start_secs();
    if start > 0.0 {
        args.extend(["-ss".into(), format!("{start:.6}")]);
    }
    args.extend(["-i".into(), job.source.to_string_lossy().to_string()]);
    if let Some(duration) = job.duration_secs() {
        args.extend(["-t".into(), format!("{duration:.6}")]);
    }
    args.extend(["-map".into(), format!("0:{}", stream.index)]);

    match (&sr.representation.delivery, stream.stream_type) {
        (_, StreamType::Subtitle) => {
            args.extend(["-c:s".into(), "webvtt".into()]);
        }
        (Delivery::Transmux, StreamType::Video) => {
            args.extend(["-c:v".into(), "copy".into()]);
        }
        (Delivery::Transmux, StreamType::Audio) => {
            args.extend(["-c:a".into(), "copy".into()]);
        }
        (Delivery::Transcode(params), StreamType::Video) => {
            let bitrate = params.video_bitrate;
            args.extend([
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "veryfast".into(),
                "-profile:v".into(),
                "high".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-b:v".into(),
                bitrate.to_string(),
                "-maxrate".into(),
                bitrate.to_string(),
                "-bufsize".into(),
                (bitrate * 2).to_string(),
                "-vf".into(),
                format!("scale={}:{}", params.width, params.height),
            ]);
            // Keyframe at every segment boundary so cuts land on the grid
            args.extend([
                "-force_key_frames".into(),
                format!("expr:gte(t,n_forced*{segment_time})"),
                "-sc_threshold".into(),
                "0".into(),
            ]);
        }
        (Delivery::Transcode(params), StreamType::Audio) => {
            args.extend([
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                params.audio_bitrate.to_string(),
                "-ac".into(),
                "2".into(),
            ]);
        }
    }

    if start > 0.0 {
        args.extend(["-output_ts_offset".into(), format!("{start:.6}")]);
    }

    args.extend(["-f".into(), "segment".into()]);
    let boundaries = job.segment_boundaries();
    if boundaries.is_empty() {
        // Single-segment run; keep the muxer from applying its default cut
        let whole = sr.stream.ticks_to_secs(sr.stream.duration_ticks) + job.segment_duration_secs;
        args.extend(["-segment_time".into(), format!("{whole:.3}")]);
    } else {
        let times: Vec<String> = boundaries.iter().map(|t| format!("{t:.6}")).collect();
        args.extend(["-segment_times".into(), times.join(",")]);
    }
    args.extend([
        "-segment_time_delta".into(),
        "0.001".into(),
        "-segment_start_number".into(),
        "0".into(),
    ]);

    match stream.stream_type {
        StreamType::Subtitle => {
            args.extend([
                "-segment_format".into(),
                "webvtt".into(),
                "-y".into(),
                format!("{SEGMENT_PREFIX}%d.vtt"),
            ]);
        }
        StreamType::Video | StreamType::Audio => {
            args.extend([
                "-segment_format".into(),
                "mp4".into(),
                "-segment_format_options".into(),
                FRAGMENT_FLAGS.into(),
                "-segment_header_filename".into(),
                INIT_SEGMENT.into(),
                "-y".into(),
                format!("{SEGMENT_PREFIX}%d.m4s"),
            ]);
        }
    }

    args
}
