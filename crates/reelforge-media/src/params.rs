//! Encoder parameters for transcoded representations.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reelforge_common::{Error, Result, StreamType};
use serde::{Deserialize, Serialize};

/// Dimension sentinel: derive from the other dimension, keeping aspect ratio.
pub const PRESERVE_ASPECT: i32 = -2;

/// Codec string of every transcoded audio representation.
pub const AAC_CODEC: &str = "mp4a.40.2";

/// Target settings for one encoder run.
///
/// The serialized form is what custom representation ids carry, so the
/// field set must round-trip losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncoderParams {
    /// Output width, or [`PRESERVE_ASPECT`]. Zero for audio.
    pub width: i32,
    /// Output height, or [`PRESERVE_ASPECT`]. Zero for audio.
    pub height: i32,
    /// Video bitrate in bits per second, zero for audio-only output.
    pub video_bitrate: u64,
    /// Audio bitrate in bits per second, zero for video-only output.
    pub audio_bitrate: u64,
    /// Codec signalling string of the produced stream.
    pub codec: String,
}

impl EncoderParams {
    /// Video parameters; the codec string is derived from the scaled size.
    pub fn video(
        width: i32,
        height: i32,
        video_bitrate: u64,
        source_width: u32,
        source_height: u32,
    ) -> Self {
        let (w, h) = scale(source_width, source_height, width, height);
        Self {
            width,
            height,
            video_bitrate,
            audio_bitrate: 0,
            codec: h264_codec_string(w, h, video_bitrate),
        }
    }

    /// AAC audio parameters.
    pub fn audio(audio_bitrate: u64) -> Self {
        Self {
            width: 0,
            height: 0,
            video_bitrate: 0,
            audio_bitrate,
            codec: AAC_CODEC.to_string(),
        }
    }

    /// The kind of stream these parameters produce.
    pub fn stream_type(&self) -> StreamType {
        if self.video_bitrate > 0 {
            StreamType::Video
        } else {
            StreamType::Audio
        }
    }

    /// Concrete output dimensions for a given source.
    pub fn output_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        scale(source_width, source_height, self.width, self.height)
    }

    /// Text form safe for URL path segments.
    pub fn encode(&self) -> String {
        // Serializing a plain struct of strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Parse the form produced by [`encode`](Self::encode).
    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(|e| Error::UnknownRepresentation(format!("custom:{s}: {e}")))?;
        let params: Self = serde_json::from_slice(&bytes)
            .map_err(|e| Error::UnknownRepresentation(format!("custom:{s}: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        let dimension_ok = |d: i32| d >= 0 || d == PRESERVE_ASPECT;
        if !dimension_ok(self.width) || !dimension_ok(self.height) {
            return Err(Error::Validation(format!(
                "invalid dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.video_bitrate == 0 && self.audio_bitrate == 0 {
            return Err(Error::Validation("encoder params need a bitrate".into()));
        }
        Ok(())
    }
}

/// Resolve target dimensions against a source size.
///
/// A [`PRESERVE_ASPECT`] dimension is derived from the other one and rounded
/// to the nearest even number, as H.264 with 4:2:0 chroma requires. When both
/// are sentinels the source size is kept.
pub fn scale(source_width: u32, source_height: u32, width: i32, height: i32) -> (u32, u32) {
    let derive = |target: i32, from: u32, to: u32| -> u32 {
        if from == 0 {
            return round_even(target as f64);
        }
        round_even(target as f64 * to as f64 / from as f64)
    };

    match (width, height) {
        (PRESERVE_ASPECT, PRESERVE_ASPECT) => (source_width, source_height),
        (PRESERVE_ASPECT, h) if h > 0 => (derive(h, source_height, source_width), h as u32),
        (w, PRESERVE_ASPECT) if w > 0 => (w as u32, derive(w, source_width, source_height)),
        (w, h) => (w.max(0) as u32, h.max(0) as u32),
    }
}

fn round_even(value: f64) -> u32 {
    let even = ((value / 2.0).round() * 2.0) as u32;
    even.max(2)
}

/// H.264 level limits: `(level_idc, max macroblocks per frame, max bitrate in bps)`.
///
/// Tiers are ordered so both limits grow monotonically.
const H264_LEVELS: &[(u8, u32, u64)] = &[
    (10, 99, 64_000),
    (11, 396, 192_000),
    (12, 396, 384_000),
    (13, 396, 768_000),
    (20, 396, 2_000_000),
    (21, 792, 4_000_000),
    (22, 1_620, 4_000_000),
    (30, 1_620, 10_000_000),
    (31, 3_600, 14_000_000),
    (32, 5_120, 20_000_000),
    (40, 8_192, 20_000_000),
    (41, 8_192, 50_000_000),
    (42, 8_704, 50_000_000),
    (50, 22_080, 135_000_000),
    (51, 36_864, 240_000_000),
    (52, 36_864, 240_000_000),
];

/// Smallest H.264 level that fits a frame size and bitrate, else the highest.
pub fn h264_level(width: u32, height: u32, bitrate: u64) -> u8 {
    let macroblocks = width.div_ceil(16) * height.div_ceil(16);
    H264_LEVELS
        .iter()
        .find(|(_, max_mbs, max_bitrate)| macroblocks <= *max_mbs && bitrate <= *max_bitrate)
        .or_else(|| H264_LEVELS.last())
        .map(|(level, _, _)| *level)
        .unwrap_or(52)
}

/// `avc1` string for High profile output at the derived level.
pub fn h264_codec_string(width: u32, height: u32, bitrate: u64) -> String {
    format!("avc1.6400{:02x}", h264_level(width, height, bitrate))
}
