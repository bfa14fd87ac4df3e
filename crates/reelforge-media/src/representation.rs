//! Representation identities and descriptions.

use crate::params::EncoderParams;
use crate::presets;
use reelforge_common::{Error, Result, Stream, StreamType};
use std::fmt;
use std::str::FromStr;

const DIRECT: &str = "direct";
const CUSTOM_PREFIX: &str = "custom:";

/// Which deliverable encoding of a stream was asked for.
///
/// Parsed once at the edge; everything downstream matches on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RepresentationId {
    /// Repackage the source stream without re-encoding.
    Direct,
    /// A named entry of the preset ladders.
    Preset(String),
    /// Caller-supplied encoder settings.
    Custom(EncoderParams),
}

impl RepresentationId {
    /// Form used as a single URL path segment; `/` in preset names is escaped.
    pub fn path_segment(&self) -> String {
        self.to_string().replace('/', "%2F")
    }

    /// Whether this is the transmux path.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct)
    }
}

impl FromStr for RepresentationId {
    type Err = Error;

    /// Accepts `direct`, a preset name (raw or with `%2F`), or `custom:<params>`.
    fn from_str(s: &str) -> Result<Self> {
        if s == DIRECT {
            return Ok(Self::Direct);
        }
        if let Some(encoded) = s.strip_prefix(CUSTOM_PREFIX) {
            return EncoderParams::decode(encoded).map(Self::Custom);
        }
        let name = s.replace("%2F", "/").replace("%2f", "/");
        if presets::is_preset(&name) {
            return Ok(Self::Preset(name));
        }
        Err(Error::UnknownRepresentation(s.to_string()))
    }
}

impl fmt::Display for RepresentationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str(DIRECT),
            Self::Preset(name) => f.write_str(name),
            Self::Custom(params) => write!(f, "{CUSTOM_PREFIX}{}", params.encode()),
        }
    }
}

/// How segments of a representation are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Copy the source packets into new segments.
    Transmux,
    /// Re-encode with the given settings.
    Transcode(EncoderParams),
}

/// One deliverable encoding of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    /// Identity used in URLs and session keys.
    pub id: RepresentationId,
    /// Bitrate in bits per second.
    pub bitrate: u64,
    /// Container MIME type of segments.
    pub mime_type: &'static str,
    /// Codec signalling string.
    pub codec: String,
    /// Output width, zero for non-video.
    pub width: u32,
    /// Output height, zero for non-video.
    pub height: u32,
    /// Transmux or transcode.
    pub delivery: Delivery,
}

impl Representation {
    /// Repackaged source stream.
    pub fn transmux(stream: &Stream) -> Self {
        Self {
            id: RepresentationId::Direct,
            bitrate: stream.bitrate,
            mime_type: mime_type(stream.stream_type),
            codec: stream.codec.clone(),
            width: stream.width,
            height: stream.height,
            delivery: Delivery::Transmux,
        }
    }

    /// Re-encoded stream.
    pub fn transcode(stream: &Stream, id: RepresentationId, params: EncoderParams) -> Self {
        let (width, height) = match stream.stream_type {
            StreamType::Video => params.output_size(stream.width, stream.height),
            _ => (0, 0),
        };
        let bitrate = match stream.stream_type {
            StreamType::Video => params.video_bitrate,
            _ => params.audio_bitrate,
        };
        Self {
            id,
            bitrate,
            mime_type: mime_type(stream.stream_type),
            codec: params.codec.clone(),
            width,
            height,
            delivery: Delivery::Transcode(params),
        }
    }

    /// Whether segments are re-encoded.
    pub fn transcoded(&self) -> bool {
        matches!(self.delivery, Delivery::Transcode(_))
    }

    /// Whether segments are repackaged source packets.
    pub fn transmuxed(&self) -> bool {
        matches!(self.delivery, Delivery::Transmux)
    }

    /// Encoder settings of a transcoded representation.
    pub fn encoder_params(&self) -> Option<&EncoderParams> {
        match &self.delivery {
            Delivery::Transcode(params) => Some(params),
            Delivery::Transmux => None,
        }
    }
}

/// Segment MIME type for a stream type.
pub fn mime_type(stream_type: StreamType) -> &'static str {
    match stream_type {
        StreamType::Video => "video/mp4",
        StreamType::Audio => "audio/mp4",
        StreamType::Subtitle => "text/vtt",
    }
}

/// A stream, one of its representations, and where its segments start.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRepresentation {
    /// Probed source stream.
    pub stream: Stream,
    /// Deliverable encoding.
    pub representation: Representation,
    /// Segment start timestamps in stream ticks, strictly increasing, first is 0.
    pub segment_starts: Vec<i64>,
}

impl StreamRepresentation {
    /// Number of segments.
    pub fn segment_count(&self) -> u32 {
        self.segment_starts.len() as u32
    }

    /// Start tick of a segment.
    pub fn segment_start(&self, index: u32) -> Option<i64> {
        self.segment_starts.get(index as usize).copied()
    }

    /// End tick of a segment; the last one ends at the stream duration.
    pub fn segment_end(&self, index: u32) -> Option<i64> {
        let index = index as usize;
        if index >= self.segment_starts.len() {
            return None;
        }
        Some(
            self.segment_starts
                .get(index + 1)
                .copied()
                .unwrap_or(self.stream.duration_ticks),
        )
    }

    /// Index of the segment containing tick `ts`. Times before the first
    /// segment map to 0, times past the end to the last segment.
    pub fn segment_at(&self, ts: i64) -> u32 {
        self.segment_starts
            .partition_point(|&start| start <= ts)
            .saturating_sub(1) as u32
    }

    /// Start of a segment in seconds.
    pub fn segment_start_secs(&self, index: u32) -> Option<f64> {
        self.segment_start(index)
            .map(|ticks| self.stream.ticks_to_secs(ticks))
    }

    /// Per-segment durations in ticks.
    ///
    /// The stream duration is appended as a synthetic final boundary so the
    /// last segment gets its real length.
    pub fn segment_durations_ticks(&self) -> Vec<i64> {
        let mut bounds = self.segment_starts.clone();
        bounds.push(self.stream.duration_ticks.max(
            self.segment_starts.last().copied().unwrap_or(0),
        ));
        bounds.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Per-segment durations in seconds.
    pub fn segment_durations_secs(&self) -> Vec<f64> {
        self.segment_durations_ticks()
            .into_iter()
            .map(|d| self.stream.ticks_to_secs(d))
            .collect()
    }

    /// Longest segment in seconds.
    pub fn max_segment_duration_secs(&self) -> f64 {
        self.segment_durations_secs()
            .into_iter()
            .fold(0.0, f64::max)
    }

    /// Stream type shortcut.
    pub fn stream_type(&self) -> StreamType {
        self.stream.stream_type
    }
}
