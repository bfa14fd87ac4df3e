//! Raw inspection output and derivation of [`Stream`] facts from it.

use reelforge_common::{Rational, Stream, StreamType};
use serde::{Deserialize, Serialize};

use super::codec;

/// Bitrate assumed for video when neither the stream nor the file size tells us.
pub const FALLBACK_VIDEO_BITRATE: u64 = 10_000_000;

/// Bitrate assumed for audio streams that do not report one.
pub const FALLBACK_AUDIO_BITRATE: u64 = 128_000;

/// Time base assumed when the tool reports none.
const FALLBACK_TIME_BASE: Rational = Rational::new(1, 1000);

/// Everything the inspection tool reported about one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeContainer {
    /// Container-level facts.
    pub format: ProbeFormat,
    /// Per-stream facts, in container order.
    pub streams: Vec<ProbeStream>,
}

/// Container-level facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeFormat {
    /// Container format name (`matroska,webm`, `mov,mp4,m4a,3gp,3g2,mj2`).
    pub format_name: String,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// File size in bytes.
    pub size: Option<u64>,
    /// Overall bitrate in bits per second.
    pub bit_rate: Option<u64>,
}

/// Facts about one stream as reported by the inspection tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStream {
    /// Container-level stream index.
    pub index: u32,
    /// `video`, `audio`, `subtitle`, `data`, `attachment`.
    pub codec_type: String,
    /// Short codec name (`h264`, `aac`).
    pub codec_name: Option<String>,
    /// Codec profile name (`High`, `LC`).
    pub profile: Option<String>,
    /// Codec level as an integer (`40` for H.264 level 4.0).
    pub level: Option<i32>,
    /// Width in pixels.
    pub width: Option<u32>,
    /// Height in pixels.
    pub height: Option<u32>,
    /// Average frame rate as a fraction string.
    pub avg_frame_rate: Option<String>,
    /// Real base frame rate as a fraction string.
    pub r_frame_rate: Option<String>,
    /// Time base as a fraction string.
    pub time_base: Option<String>,
    /// Duration in time base ticks.
    pub duration_ts: Option<i64>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// Bitrate in bits per second.
    pub bit_rate: Option<u64>,
    /// Audio channel count.
    pub channels: Option<u32>,
    /// Language tag.
    pub language: Option<String>,
    /// Title tag.
    pub title: Option<String>,
    /// Default disposition.
    pub default: bool,
    /// Embedded cover art, never played as video.
    pub attached_pic: bool,
}

impl ProbeContainer {
    /// Derive [`Stream`] facts for every playable stream in the file.
    ///
    /// Streams of other kinds (data, attachments, cover art) are skipped.
    pub fn to_streams(&self) -> Vec<Stream> {
        self.streams
            .iter()
            .filter_map(|s| self.derive_stream(s))
            .collect()
    }

    fn derive_stream(&self, raw: &ProbeStream) -> Option<Stream> {
        let stream_type = match raw.codec_type.as_str() {
            "video" if !raw.attached_pic => StreamType::Video,
            "audio" => StreamType::Audio,
            "subtitle" => StreamType::Subtitle,
            _ => return None,
        };

        let time_base = raw
            .time_base
            .as_deref()
            .and_then(|s| s.parse::<Rational>().ok())
            .filter(|r| !r.is_zero())
            .unwrap_or(FALLBACK_TIME_BASE);

        let container_duration = self.format.duration.unwrap_or(0.0);
        let duration = raw
            .duration
            .filter(|d| *d > 0.0)
            .unwrap_or(container_duration);

        let duration_ticks = match raw.duration_ts {
            Some(ticks) if ticks != 0 => ticks,
            _ => (container_duration * time_base.den as f64 / time_base.num as f64) as i64,
        };

        let codec_name = raw.codec_name.clone().unwrap_or_default();
        let codec = codec::codec_string(
            stream_type,
            &codec_name,
            raw.profile.as_deref(),
            raw.level,
        );

        let frame_rate = [raw.avg_frame_rate.as_deref(), raw.r_frame_rate.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|s| s.parse::<Rational>().ok())
            .find(|r| !r.is_zero())
            .unwrap_or_default();

        Some(Stream {
            index: raw.index,
            duration,
            time_base,
            duration_ticks,
            codec,
            codec_name,
            bitrate: self.bitrate_for(raw, stream_type),
            frame_rate,
            width: raw.width.unwrap_or(0),
            height: raw.height.unwrap_or(0),
            stream_type,
            language: raw.language.clone(),
            title: raw.title.clone(),
            default: raw.default,
        })
    }

    /// Reported bitrate, else a crude estimate.
    ///
    /// Video without a reported bitrate is estimated as the whole file's average
    /// rate (`size / duration * 8`), else [`FALLBACK_VIDEO_BITRATE`]. Manifest
    /// ladders are tuned against these magnitudes, so keep them as they are.
    fn bitrate_for(&self, raw: &ProbeStream, stream_type: StreamType) -> u64 {
        if let Some(rate) = raw.bit_rate.filter(|r| *r > 0) {
            return rate;
        }
        match stream_type {
            StreamType::Video => match (self.format.size, self.format.duration) {
                (Some(size), Some(duration)) if duration > 0.0 => {
                    ((size as f64 / duration) * 8.0) as u64
                }
                _ => FALLBACK_VIDEO_BITRATE,
            },
            StreamType::Audio => FALLBACK_AUDIO_BITRATE,
            StreamType::Subtitle => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(streams: Vec<ProbeStream>) -> ProbeContainer {
        ProbeContainer {
            format: ProbeFormat {
                format_name: "matroska,webm".into(),
                duration: Some(100.0),
                size: Some(50_000_000),
                bit_rate: None,
            },
            streams,
        }
    }

    fn h264() -> ProbeStream {
        ProbeStream {
            index: 0,
            codec_type: "video".into(),
            codec_name: Some("h264".into()),
            profile: Some("High".into()),
            level: Some(40),
            width: Some(1920),
            height: Some(1080),
            avg_frame_rate: Some("24000/1001".into()),
            time_base: Some("1/1000".into()),
            ..Default::default()
        }
    }

    #[test]
    fn duration_ticks_fall_back_to_container_duration() {
        let streams = container(vec![h264()]).to_streams();
        assert_eq!(streams[0].duration_ticks, 100_000);
        assert_eq!(streams[0].duration, 100.0);
    }

    #[test]
    fn duration_ticks_prefer_tool_value() {
        let mut raw = h264();
        raw.duration_ts = Some(12_345);
        let streams = container(vec![raw]).to_streams();
        assert_eq!(streams[0].duration_ticks, 12_345);
    }

    #[test]
    fn zero_tool_ticks_are_ignored() {
        let mut raw = h264();
        raw.duration_ts = Some(0);
        let streams = container(vec![raw]).to_streams();
        assert_eq!(streams[0].duration_ticks, 100_000);
    }

    #[test]
    fn video_bitrate_estimated_from_file_size() {
        let streams = container(vec![h264()]).to_streams();
        // 50 MB over 100 s
        assert_eq!(streams[0].bitrate, 4_000_000);
    }

    #[test]
    fn video_bitrate_fixed_fallback_without_duration() {
        let mut c = container(vec![h264()]);
        c.format.duration = None;
        let streams = c.to_streams();
        assert_eq!(streams[0].bitrate, FALLBACK_VIDEO_BITRATE);
    }

    #[test]
    fn reported_bitrate_wins() {
        let mut raw = h264();
        raw.bit_rate = Some(6_000_000);
        let streams = container(vec![raw]).to_streams();
        assert_eq!(streams[0].bitrate, 6_000_000);
    }

    #[test]
    fn skips_cover_art_and_data() {
        let mut art = h264();
        art.index = 1;
        art.attached_pic = true;
        let data = ProbeStream {
            index: 2,
            codec_type: "data".into(),
            ..Default::default()
        };
        let streams = container(vec![h264(), art, data]).to_streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].codec, "avc1.640028");
        assert_eq!(streams[0].frame_rate, Rational::new(24000, 1001));
    }

    #[test]
    fn audio_stream_derivation() {
        let aac = ProbeStream {
            index: 1,
            codec_type: "audio".into(),
            codec_name: Some("aac".into()),
            profile: Some("LC".into()),
            time_base: Some("1/48000".into()),
            language: Some("eng".into()),
            default: true,
            ..Default::default()
        };
        let streams = container(vec![aac]).to_streams();
        let audio = &streams[0];
        assert_eq!(audio.stream_type, StreamType::Audio);
        assert_eq!(audio.codec, "mp4a.40.2");
        assert_eq!(audio.duration_ticks, 4_800_000);
        assert_eq!(audio.bitrate, FALLBACK_AUDIO_BITRATE);
        assert_eq!(audio.language.as_deref(), Some("eng"));
        assert!(audio.default);
    }
}
